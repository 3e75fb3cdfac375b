//! Per-tenant map listing.
//!
//! The listing is derived data: it can be rebuilt from the `.wam` documents
//! in storage at any time and is never consulted to decide what a file
//! contains. Readers get NotFound or InvalidCache when the artifact is
//! missing or unreadable and are expected to regenerate once.

use async_trait::async_trait;
use mapstore_core::wam::{WamFile, WamMetadata};
use mapstore_core::{MapStoreError, MapStoreResult, VirtualPath};
use mapstore_storage::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gate::PathGate;
use crate::tenant::PathMapper;
use crate::validator::MapValidator;

pub const CACHE_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapsCacheEntry {
    pub map_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WamMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Value>,
}

impl From<&WamFile> for MapsCacheEntry {
    fn from(wam: &WamFile) -> Self {
        Self {
            map_url: wam.map_url.clone(),
            metadata: wam.metadata.clone(),
            vendor: wam.vendor.clone(),
        }
    }
}

/// The listing artifact: `.wam` path (tenant-relative) to its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapsCacheFile {
    pub version: String,
    pub maps: BTreeMap<String, MapsCacheEntry>,
}

impl Default for MapsCacheFile {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION.to_string(),
            maps: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait MapListCache: Send + Sync {
    /// Rebuild the tenant's listing from storage and persist it.
    async fn regenerate(&self, tenant: &str) -> MapStoreResult<MapsCacheFile>;

    /// Insert or replace one entry. `path` is tenant-relative.
    async fn upsert(&self, tenant: &str, path: &VirtualPath, wam: &WamFile) -> MapStoreResult<()>;

    /// Drop one entry. Missing entries are ignored.
    async fn delete(&self, tenant: &str, path: &VirtualPath) -> MapStoreResult<()>;

    /// Current listing. NotFound if absent, InvalidCache if unparsable.
    async fn read(&self, tenant: &str) -> MapStoreResult<MapsCacheFile>;
}

/// JSON listing stored on the storage port at the mapper's cache path.
pub struct StorageMapListCache {
    fs: Arc<dyn FileSystem>,
    mapper: Arc<dyn PathMapper>,
    validator: Arc<dyn MapValidator>,
    gate: PathGate,
}

impl StorageMapListCache {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        mapper: Arc<dyn PathMapper>,
        validator: Arc<dyn MapValidator>,
    ) -> Self {
        Self {
            fs,
            mapper,
            validator,
            gate: PathGate::new(),
        }
    }

    async fn load(&self, cache_path: &VirtualPath) -> MapStoreResult<MapsCacheFile> {
        let text = self.fs.read_to_string(cache_path).await?;
        serde_json::from_str(&text)
            .map_err(|e| MapStoreError::InvalidCache(format!("{cache_path}: {e}")))
    }

    async fn store(&self, cache_path: &VirtualPath, cache: &MapsCacheFile) -> MapStoreResult<()> {
        let text = serde_json::to_string_pretty(cache)
            .map_err(|e| MapStoreError::Cache(format!("serializing listing: {e}")))?;
        self.fs
            .write_string(cache_path, text)
            .await
            .map_err(|e| MapStoreError::Cache(format!("writing {cache_path}: {e}")))
    }

    /// Scan storage and persist. Caller holds the cache path's permit.
    async fn rebuild(&self, tenant: &str, cache_path: &VirtualPath) -> MapStoreResult<MapsCacheFile> {
        let root = self.mapper.tenant_root(tenant);
        let mut cache = MapsCacheFile::default();

        for file in self.fs.list_files(&root).await? {
            if !file.has_extension("wam") {
                continue;
            }
            let Some(rel) = file.strip_prefix(&root) else {
                continue;
            };
            if rel.is_hidden() {
                continue;
            }
            let text = match self.fs.read_to_string(&file).await {
                Ok(text) => text,
                // removed between list and read
                Err(MapStoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            match self.validator.validate_wam(&text) {
                Ok(wam) => {
                    cache.maps.insert(rel.as_str().to_string(), MapsCacheEntry::from(&wam));
                }
                Err(report) => {
                    warn!(path = %file, errors = report.len(), "skipping invalid wam in listing");
                }
            }
        }

        self.store(cache_path, &cache).await?;
        info!(tenant, maps = cache.maps.len(), "map listing regenerated");
        Ok(cache)
    }
}

#[async_trait]
impl MapListCache for StorageMapListCache {
    async fn regenerate(&self, tenant: &str) -> MapStoreResult<MapsCacheFile> {
        let cache_path = self.mapper.cache_path(tenant);
        let _permit = self.gate.acquire(cache_path.as_str()).await;
        self.rebuild(tenant, &cache_path).await
    }

    async fn upsert(&self, tenant: &str, path: &VirtualPath, wam: &WamFile) -> MapStoreResult<()> {
        let cache_path = self.mapper.cache_path(tenant);
        let _permit = self.gate.acquire(cache_path.as_str()).await;
        match self.load(&cache_path).await {
            Ok(mut cache) => {
                cache
                    .maps
                    .insert(path.as_str().to_string(), MapsCacheEntry::from(wam));
                self.store(&cache_path, &cache).await?;
                debug!(tenant, path = %path, "listing entry upserted");
                Ok(())
            }
            // the rebuild picks up the freshly written document
            Err(e) if e.is_cache_miss() => self.rebuild(tenant, &cache_path).await.map(|_| ()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, tenant: &str, path: &VirtualPath) -> MapStoreResult<()> {
        let cache_path = self.mapper.cache_path(tenant);
        let _permit = self.gate.acquire(cache_path.as_str()).await;
        match self.load(&cache_path).await {
            Ok(mut cache) => {
                if cache.maps.remove(path.as_str()).is_some() {
                    self.store(&cache_path, &cache).await?;
                    debug!(tenant, path = %path, "listing entry removed");
                }
                Ok(())
            }
            Err(e) if e.is_cache_miss() => self.rebuild(tenant, &cache_path).await.map(|_| ()),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, tenant: &str) -> MapStoreResult<MapsCacheFile> {
        self.load(&self.mapper.cache_path(tenant)).await
    }
}
