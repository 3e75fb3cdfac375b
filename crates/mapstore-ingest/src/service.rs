//! `MapStore`: the entry point used by the HTTP layer.
//!
//! Every mutating operation resolves its tenant path, waits for the path's
//! permit and then runs the pipeline in a spawned task that owns the permit.
//! Once the permit is granted the pipeline runs to completion even if the
//! caller goes away, so a dropped connection cannot stop an archive replace
//! half-way.

use bytes::Bytes;
use mapstore_core::config::MapStoreConfig;
use mapstore_core::wam::WamFile;
use mapstore_core::{MapStoreError, MapStoreResult, VirtualPath};
use mapstore_storage::{archive_stream, ArchiveStream, FileSystem};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{MapListCache, MapsCacheFile, StorageMapListCache};
use crate::gate::PathGate;
use crate::notify::MapChangeNotifier;
use crate::patch::parse_patch;
use crate::tenant::{DomainPathMapper, PathMapper, TenantPath};
use crate::upload::UploadReport;
use crate::validator::{BasicMapValidator, MapValidator};

#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    /// Ceiling C: single-file size and summed archive contents, in bytes
    pub max_uncompressed_size: u64,
    /// Parallel storage writes during an archive commit
    pub write_concurrency: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_uncompressed_size: 1024 * 1024 * 1024,
            write_concurrency: 100,
        }
    }
}

impl IngestLimits {
    pub fn from_config(config: &MapStoreConfig) -> Self {
        Self {
            max_uncompressed_size: config.upload.max_uncompressed_size,
            write_concurrency: config.storage.upload_concurrency,
        }
    }
}

#[derive(Clone)]
pub struct MapStore {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) validator: Arc<dyn MapValidator>,
    pub(crate) cache: Arc<dyn MapListCache>,
    pub(crate) mapper: Arc<dyn PathMapper>,
    pub(crate) notifier: MapChangeNotifier,
    pub(crate) gate: PathGate,
    pub(crate) limits: IngestLimits,
}

/// Parse a client path, refusing hidden paths (the listing cache lives in one).
fn client_path(raw: &str) -> MapStoreResult<VirtualPath> {
    let path = VirtualPath::parse(raw)?;
    if path.is_hidden() {
        return Err(MapStoreError::InvalidPath(format!(
            "{path}: hidden files cannot be addressed"
        )));
    }
    Ok(path)
}

fn client_file(raw: &str) -> MapStoreResult<VirtualPath> {
    let path = client_path(raw)?;
    if path.is_root() {
        return Err(MapStoreError::InvalidPath("a file path is required".into()));
    }
    Ok(path)
}

impl MapStore {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        validator: Arc<dyn MapValidator>,
        cache: Arc<dyn MapListCache>,
        mapper: Arc<dyn PathMapper>,
        limits: IngestLimits,
    ) -> Self {
        Self {
            fs,
            validator,
            cache,
            mapper,
            notifier: MapChangeNotifier::new(),
            gate: PathGate::new(),
            limits,
        }
    }

    /// Wire the built-in validator, listing cache and path mapper.
    pub fn with_defaults(fs: Arc<dyn FileSystem>, config: &MapStoreConfig) -> Self {
        let validator: Arc<dyn MapValidator> = Arc::new(BasicMapValidator::new());
        let mapper: Arc<dyn PathMapper> =
            Arc::new(DomainPathMapper::new(config.paths.use_domain_name_in_path));
        let cache = Arc::new(StorageMapListCache::new(
            fs.clone(),
            mapper.clone(),
            validator.clone(),
        ));
        Self::new(fs, validator, cache, mapper, IngestLimits::from_config(config))
    }

    pub fn notifier(&self) -> &MapChangeNotifier {
        &self.notifier
    }

    pub fn gate(&self) -> &PathGate {
        &self.gate
    }

    pub fn limits(&self) -> IngestLimits {
        self.limits
    }

    pub fn resolve(&self, tenant: &str, rel: VirtualPath) -> TenantPath {
        self.mapper.resolve(tenant, rel)
    }

    /// Wait for `key`'s permit, then run `op` to completion in its own task.
    async fn run_gated<T, Fut>(&self, key: &VirtualPath, op: Fut) -> MapStoreResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = MapStoreResult<T>> + Send + 'static,
    {
        let permit = self.gate.acquire(key.as_str()).await;
        debug!(key = %key, "permit granted");
        tokio::spawn(async move {
            let _permit = permit;
            op.await
        })
        .await
        .map_err(|e| MapStoreError::Other(anyhow::anyhow!("pipeline task failed: {e}")))?
    }

    /// Replace `directory` with the contents of a zip archive.
    pub async fn upload_archive(
        &self,
        tenant: &str,
        directory: &str,
        zip: Bytes,
    ) -> MapStoreResult<UploadReport> {
        let target = self.resolve(tenant, client_path(directory)?);
        let key = target.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move { store.ingest_archive(&target, zip).await })
            .await
    }

    /// Validate and store one file.
    pub async fn put_file(&self, tenant: &str, path: &str, data: Bytes) -> MapStoreResult<()> {
        let target = self.resolve(tenant, client_file(path)?);
        let key = target.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move { store.ingest_file(&target, data).await })
            .await
    }

    /// Apply a JSON-Patch operation list to a stored `.wam` document.
    pub async fn patch_wam(&self, tenant: &str, path: &str, ops: Value) -> MapStoreResult<WamFile> {
        let rel = client_file(path)?;
        if !rel.has_extension("wam") {
            return Err(MapStoreError::InvalidPath(format!(
                "{rel}: only .wam documents can be patched"
            )));
        }
        let patch = parse_patch(ops)?;
        let target = self.resolve(tenant, rel);
        let key = target.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move { store.apply_patch(&target, patch).await })
            .await
    }

    /// Delete every file below a directory and rebuild the listing.
    pub async fn delete_directory(&self, tenant: &str, directory: &str) -> MapStoreResult<()> {
        let target = self.resolve(tenant, client_path(directory)?);
        let key = target.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move {
            store.fs.delete_files(&target.stored).await?;
            store.cache.regenerate(&target.tenant).await?;
            info!(dir = %target.stored, "directory deleted");
            Ok(())
        })
        .await
    }

    /// Delete one file. Deleting a `.wam` drops its listing entry.
    pub async fn delete_file(&self, tenant: &str, path: &str) -> MapStoreResult<()> {
        let target = self.resolve(tenant, client_file(path)?);
        let key = target.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move {
            if !store.fs.exists(&target.stored).await? {
                return Err(MapStoreError::NotFound(target.rel.to_string()));
            }
            store.fs.delete_files(&target.stored).await?;
            if target.rel.has_extension("wam") {
                store.cache.delete(&target.tenant, &target.rel).await?;
                store
                    .notifier
                    .notify_deleted(&target.tenant, target.rel.as_str());
            }
            info!(path = %target.stored, "file deleted");
            Ok(())
        })
        .await
    }

    /// Move a file or directory. Conflict if the destination exists.
    pub async fn move_path(&self, tenant: &str, source: &str, destination: &str) -> MapStoreResult<()> {
        let from = self.resolve(tenant, client_file(source)?);
        let to = self.resolve(tenant, client_file(destination)?);
        let key = to.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move {
            store.fs.move_path(&from.stored, &to.stored).await?;
            store.cache.regenerate(&to.tenant).await?;
            info!(from = %from.stored, to = %to.stored, "moved");
            Ok(())
        })
        .await
    }

    /// Copy a file or directory. Conflict if the destination exists.
    pub async fn copy_path(&self, tenant: &str, source: &str, destination: &str) -> MapStoreResult<()> {
        let from = self.resolve(tenant, client_file(source)?);
        let to = self.resolve(tenant, client_file(destination)?);
        let key = to.stored.clone();
        let store = self.clone();
        self.run_gated(&key, async move {
            let copied = store.fs.copy_path(&from.stored, &to.stored).await?;
            store.cache.regenerate(&to.tenant).await?;
            info!(from = %from.stored, to = %to.stored, files = copied.len(), "copied");
            Ok(())
        })
        .await
    }

    /// The tenant's map listing, rebuilt once if missing or unreadable.
    pub async fn list_maps(&self, tenant: &str) -> MapStoreResult<MapsCacheFile> {
        match self.cache.read(tenant).await {
            Ok(listing) => Ok(listing),
            Err(e) if e.is_cache_miss() => {
                debug!(tenant, "listing cache miss: {e}");
                self.cache.regenerate(tenant).await?;
                self.cache.read(tenant).await
            }
            Err(e) => Err(e),
        }
    }

    /// Stream a directory as a zip. Returns the archive's file name.
    pub async fn download(&self, tenant: &str, directory: &str) -> MapStoreResult<(String, ArchiveStream)> {
        let target = self.resolve(tenant, client_path(directory)?);
        if !target.rel.is_root() && !self.fs.exists(&target.stored).await? {
            return Err(MapStoreError::NotFound(target.rel.to_string()));
        }
        let name = match target.rel.file_name() {
            Some(base) => format!("{base}.zip"),
            None => "map.zip".to_string(),
        };
        Ok((name, archive_stream(self.fs.clone(), target.stored)))
    }
}
