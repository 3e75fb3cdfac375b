//! Archive ingestion: unpack, validate every member, then replace the
//! target directory in one go.
//!
//! Nothing touches storage until every member has passed validation. The
//! replace itself (clear, write, synthesize default WAMs, refresh listing)
//! is not transactional; a storage failure part-way leaves the directory
//! inconsistent and the error is returned to the caller to retry.

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use mapstore_core::report::ValidationErrorSet;
use mapstore_core::wam::WamFile;
use mapstore_core::{MapStoreError, MapStoreResult, VirtualPath};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::classify::{check_file, Checked, FileKind};
use crate::service::MapStore;
use crate::tenant::TenantPath;
use crate::validator::FileContext;

/// One stored member of an uploaded archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Name as it appears in the archive; validation errors are keyed by it
    pub name: String,
    /// Canonical path relative to the upload directory
    pub path: VirtualPath,
    pub size: u64,
    pub data: Bytes,
}

/// Decoded archive: the members that will be stored, in archive order.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub entries: Vec<ArchiveEntry>,
    pub total_size: u64,
    /// Directories and hidden members left out
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub directory: String,
    pub files: usize,
    /// Default WAM documents created for maps uploaded without one
    pub synthesized: Vec<String>,
}

/// Hidden check on the raw entry name. Runs before canonicalization so that
/// `..` segments count as hidden too.
fn is_hidden_entry(name: &str) -> bool {
    name.split(['/', '\\']).any(|s| s.starts_with('.'))
}

fn malformed(e: impl std::fmt::Display) -> MapStoreError {
    MapStoreError::MalformedRequest(format!("invalid zip archive: {e}"))
}

/// Decode an archive, enforcing `ceiling` on the summed uncompressed size.
///
/// Blocking: call from `spawn_blocking`. Declared sizes are checked first so
/// an oversized upload is refused without inflating anything; the budget is
/// then enforced again on the bytes actually produced.
pub fn read_batch(zip: Bytes, ceiling: u64) -> MapStoreResult<UploadBatch> {
    let mut archive = ZipArchive::new(Cursor::new(zip)).map_err(malformed)?;
    let mut batch = UploadBatch::default();

    let mut selected = Vec::new();
    let mut declared = 0u64;
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(malformed)?;
        if file.is_dir() || is_hidden_entry(file.name()) {
            batch.skipped += 1;
            continue;
        }
        declared = declared.saturating_add(file.size());
        selected.push(index);
    }
    if declared > ceiling {
        return Err(MapStoreError::PayloadTooLarge { limit: ceiling });
    }

    let mut budget = ceiling;
    let mut seen = HashSet::new();
    for index in selected {
        let file = archive.by_index(index).map_err(malformed)?;
        let name = file.name().to_string();
        let path = VirtualPath::parse(&name).map_err(malformed)?;
        if path.is_root() {
            batch.skipped += 1;
            continue;
        }
        // `a/b.png` and `a\b.png` are the same stored file
        if !seen.insert(path.clone()) {
            return Err(MapStoreError::MalformedRequest(format!(
                "archive contains {path} more than once"
            )));
        }

        let mut data = Vec::with_capacity(file.size().min(budget) as usize);
        file.take(budget.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(malformed)?;
        let size = data.len() as u64;
        if size > budget {
            return Err(MapStoreError::PayloadTooLarge { limit: ceiling });
        }
        budget -= size;
        batch.total_size += size;
        batch.entries.push(ArchiveEntry {
            name,
            path,
            size,
            data: Bytes::from(data),
        });
    }
    Ok(batch)
}

fn default_wam_for(map: &VirtualPath) -> MapStoreResult<String> {
    let url = format!("./{}", map.file_name().unwrap_or_default());
    WamFile::fresh(url)
        .to_pretty_json()
        .map_err(|e| MapStoreError::Other(e.into()))
}

impl MapStore {
    /// Runs with the target directory's permit held.
    pub(crate) async fn ingest_archive(
        &self,
        target: &TenantPath,
        zip: Bytes,
    ) -> MapStoreResult<UploadReport> {
        let ceiling = self.limits.max_uncompressed_size;
        let batch = tokio::task::spawn_blocking(move || read_batch(zip, ceiling))
            .await
            .map_err(|e| MapStoreError::Other(anyhow::anyhow!("archive decoder panicked: {e}")))??;

        let available: Vec<VirtualPath> = batch.entries.iter().map(|e| e.path.clone()).collect();
        let mut errors = ValidationErrorSet::new();
        let mut batch_wams = HashSet::new();
        for entry in &batch.entries {
            let ctx = FileContext {
                path: &entry.path,
                available: Some(&available),
            };
            match check_file(self.validator.as_ref(), &entry.data, ctx).await {
                Ok(Checked::Wam(_)) => {
                    batch_wams.insert(entry.path.clone());
                }
                Ok(_) => {}
                Err(report) => {
                    errors.insert(entry.name.clone(), report);
                }
            }
        }
        if !errors.is_empty() {
            warn!(dir = %target.stored, rejected = errors.len(), "archive rejected");
            return Err(MapStoreError::Validation(errors));
        }

        let dir = &target.stored;
        let keep: Vec<VirtualPath> = batch.entries.iter().map(|e| dir.join(&e.path)).collect();
        self.fs.delete_files_except_wam(dir, &keep).await?;

        let writes: Vec<(VirtualPath, Bytes)> = batch
            .entries
            .iter()
            .map(|entry| (dir.join(&entry.path), entry.data.clone()))
            .collect();
        let fs = self.fs.clone();
        stream::iter(writes.into_iter().map(move |(path, data)| {
            let fs = fs.clone();
            async move { fs.write(&path, data).await }
        }))
        .buffer_unordered(self.limits.write_concurrency.max(1))
        .try_collect::<Vec<()>>()
        .await?;

        let mut synthesized = Vec::new();
        for entry in &batch.entries {
            if FileKind::of(&entry.path) != FileKind::Map {
                continue;
            }
            let wam = entry.path.with_extension("wam");
            if batch_wams.contains(&wam) || self.fs.is_file(&dir.join(&wam)).await? {
                continue;
            }
            self.fs
                .write_string(&dir.join(&wam), default_wam_for(&entry.path)?)
                .await?;
            synthesized.push(wam);
        }

        for wam in batch_wams.iter().chain(&synthesized) {
            self.notifier
                .notify(&target.tenant, target.rel.join(wam).as_str());
        }
        self.cache.regenerate(&target.tenant).await?;

        info!(
            dir = %target.stored,
            files = batch.entries.len(),
            bytes = batch.total_size,
            skipped = batch.skipped,
            synthesized = synthesized.len(),
            "archive committed"
        );
        Ok(UploadReport {
            directory: target.rel.as_str().to_string(),
            files: batch.entries.len(),
            synthesized: synthesized
                .iter()
                .map(|p| target.rel.join(p).as_str().to_string())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn zip_of(files: &[(&str, &[u8])]) -> Bytes {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        Bytes::from(zip.finish().unwrap().into_inner())
    }

    #[test]
    fn hidden_and_directory_entries_are_skipped() {
        let zip = zip_of(&[
            ("maps/", b""),
            ("maps/office.tmj", b"{}"),
            (".git/config", b"x"),
            ("__MACOSX/._office.tmj", b"x"),
            ("maps/.DS_Store", b"x"),
            ("../escape.png", b"x"),
            ("maps\\..\\..\\win.png", b"x"),
        ]);
        let batch = read_batch(zip, 1024).unwrap();
        let names: Vec<_> = batch.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["maps/office.tmj"]);
        assert_eq!(batch.skipped, 6);
        assert_eq!(batch.total_size, 2);
    }

    #[test]
    fn ceiling_is_inclusive() {
        let zip = zip_of(&[("a.png", &[0u8; 60]), ("b.png", &[0u8; 40])]);
        assert_eq!(read_batch(zip.clone(), 100).unwrap().total_size, 100);
        assert!(matches!(
            read_batch(zip, 99),
            Err(MapStoreError::PayloadTooLarge { limit: 99 })
        ));
    }

    #[test]
    fn hidden_entries_do_not_count_against_the_ceiling() {
        let zip = zip_of(&[("a.png", &[0u8; 10]), (".big", &[0u8; 1000])]);
        assert_eq!(read_batch(zip, 10).unwrap().entries.len(), 1);
    }

    #[test]
    fn entries_naming_the_same_file_are_refused() {
        let zip = zip_of(&[("a/b.png", b"first"), ("a\\b.png", b"second")]);
        let err = read_batch(zip, 1024).unwrap_err();
        assert!(matches!(err, MapStoreError::MalformedRequest(_)), "{err:?}");

        let zip = zip_of(&[("x/y.png", b"first"), ("x//y.png", b"second")]);
        assert!(matches!(
            read_batch(zip, 1024),
            Err(MapStoreError::MalformedRequest(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = read_batch(Bytes::from_static(b"definitely not a zip"), 100).unwrap_err();
        assert!(matches!(err, MapStoreError::MalformedRequest(_)), "{err:?}");
    }

    #[test]
    fn default_wam_points_at_sibling_map() {
        let text = default_wam_for(&VirtualPath::parse("rooms/office.tmj").unwrap()).unwrap();
        let wam: WamFile = serde_json::from_str(&text).unwrap();
        assert_eq!(wam.map_url, "./office.tmj");
        assert_eq!(wam.version, "1.0.0");
        assert!(text.contains("\n    \"version\""), "4-space indent: {text}");
    }
}
