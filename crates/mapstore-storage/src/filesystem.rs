//! Storage port used by the ingestion pipelines.
//!
//! Backends implement five primitives (`read`, `write`, `remove`, `is_file`,
//! `list_files`); everything else is provided on top of them and may be
//! overridden when a backend has a native equivalent (e.g. server-side copy).
//!
//! # Contract
//!
//! - Paths are canonical [`VirtualPath`]s; directories are implicit prefixes.
//! - `read` fails with [`MapStoreError::NotFound`] for a missing file.
//! - `move_path` / `copy_path` fail with [`MapStoreError::Conflict`] if the
//!   destination exists and perform no mutation in that case.
//! - Implementations must tolerate concurrent calls on distinct paths.

use async_trait::async_trait;
use bytes::Bytes;
use mapstore_core::{MapStoreError, MapStoreResult, VirtualPath};
use opendal::{ErrorKind, Operator};
use tracing::debug;

/// Hidden, so map listings and archives never pick it up.
const READINESS_SENTINEL: &str = ".cache/.readiness";

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a whole file.
    async fn read(&self, path: &VirtualPath) -> MapStoreResult<Bytes>;

    /// Create or overwrite a file.
    async fn write(&self, path: &VirtualPath, data: Bytes) -> MapStoreResult<()>;

    /// Remove a single file. Removing a missing file is not an error.
    async fn remove(&self, path: &VirtualPath) -> MapStoreResult<()>;

    /// True if `path` is an existing regular file.
    async fn is_file(&self, path: &VirtualPath) -> MapStoreResult<bool>;

    /// Every file below `dir`, recursively, sorted. A missing directory is empty.
    async fn list_files(&self, dir: &VirtualPath) -> MapStoreResult<Vec<VirtualPath>>;

    /// True if `path` is a file or a non-empty directory.
    async fn exists(&self, path: &VirtualPath) -> MapStoreResult<bool> {
        if self.is_file(path).await? {
            return Ok(true);
        }
        Ok(!self.list_files(path).await?.is_empty())
    }

    async fn read_to_string(&self, path: &VirtualPath) -> MapStoreResult<String> {
        let data = self.read(path).await?;
        String::from_utf8(data.to_vec())
            .map_err(|e| MapStoreError::Storage(format!("{path}: not valid UTF-8: {e}")))
    }

    async fn write_string(&self, path: &VirtualPath, text: String) -> MapStoreResult<()> {
        self.write(path, Bytes::from(text)).await
    }

    /// Delete a single file, or every file below a directory.
    async fn delete_files(&self, path: &VirtualPath) -> MapStoreResult<()> {
        if !path.is_root() && self.is_file(path).await? {
            return self.remove(path).await;
        }
        for file in self.list_files(path).await? {
            self.remove(&file).await?;
        }
        Ok(())
    }

    /// Delete every file below `dir` except `.wam` documents and the paths in `keep`.
    async fn delete_files_except_wam(
        &self,
        dir: &VirtualPath,
        keep: &[VirtualPath],
    ) -> MapStoreResult<()> {
        let mut deleted = 0usize;
        for file in self.list_files(dir).await? {
            if file.has_extension("wam") || keep.contains(&file) {
                continue;
            }
            self.remove(&file).await?;
            deleted += 1;
        }
        debug!(dir = %dir, deleted, "cleared directory (wam files kept)");
        Ok(())
    }

    /// Round-trip a sentinel under `.cache/` to prove the backend accepts
    /// writes, not merely that it answers. Used by the readiness endpoint.
    async fn check_writable(&self) -> MapStoreResult<()> {
        let sentinel = VirtualPath::parse(READINESS_SENTINEL)?;
        let payload = Bytes::from_static(b"mapstore readiness check\n");
        self.write(&sentinel, payload.clone()).await?;
        let read_back = self.read(&sentinel).await?;
        self.remove(&sentinel).await?;
        if read_back != payload {
            return Err(MapStoreError::Storage(format!(
                "{sentinel}: read back {} bytes that differ from what was written",
                read_back.len()
            )));
        }
        Ok(())
    }

    /// Move a file or a directory tree.
    async fn move_path(&self, from: &VirtualPath, to: &VirtualPath) -> MapStoreResult<()> {
        let moved = self.copy_path(from, to).await?;
        for file in moved {
            self.remove(&file).await?;
        }
        Ok(())
    }

    /// Copy a file or a directory tree. Returns the source files that were copied.
    async fn copy_path(
        &self,
        from: &VirtualPath,
        to: &VirtualPath,
    ) -> MapStoreResult<Vec<VirtualPath>> {
        if self.exists(to).await? {
            return Err(MapStoreError::Conflict(format!("{to} already exists")));
        }
        if !from.is_root() && self.is_file(from).await? {
            let data = self.read(from).await?;
            self.write(to, data).await?;
            return Ok(vec![from.clone()]);
        }

        let files = self.list_files(from).await?;
        if files.is_empty() {
            return Err(MapStoreError::NotFound(from.to_string()));
        }
        if to.strip_prefix(from).is_some() {
            return Err(MapStoreError::Conflict(format!(
                "cannot copy {from} into itself ({to})"
            )));
        }
        for file in &files {
            let Some(rel) = file.strip_prefix(from) else {
                continue;
            };
            let data = self.read(file).await?;
            self.write(&to.join(&rel), data).await?;
        }
        Ok(files)
    }
}

/// [`FileSystem`] over any OpenDAL operator (fs, S3, memory).
#[derive(Clone)]
pub struct OpendalFileSystem {
    op: Operator,
}

impl OpendalFileSystem {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }
}

fn storage_err(path: &VirtualPath, e: opendal::Error) -> MapStoreError {
    if e.kind() == ErrorKind::NotFound {
        MapStoreError::NotFound(path.to_string())
    } else {
        MapStoreError::Storage(format!("{path}: {e}"))
    }
}

#[async_trait]
impl FileSystem for OpendalFileSystem {
    async fn read(&self, path: &VirtualPath) -> MapStoreResult<Bytes> {
        self.op
            .read(path.as_str())
            .await
            .map(|buf| buf.to_bytes())
            .map_err(|e| storage_err(path, e))
    }

    async fn write(&self, path: &VirtualPath, data: Bytes) -> MapStoreResult<()> {
        if path.is_root() {
            return Err(MapStoreError::InvalidPath("cannot write to the root".into()));
        }
        self.op
            .write(path.as_str(), data)
            .await
            .map(|_| ())
            .map_err(|e| storage_err(path, e))
    }

    async fn remove(&self, path: &VirtualPath) -> MapStoreResult<()> {
        match self.op.delete(path.as_str()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(path, e)),
        }
    }

    async fn is_file(&self, path: &VirtualPath) -> MapStoreResult<bool> {
        if path.is_root() {
            return Ok(false);
        }
        match self.op.stat(path.as_str()).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err(path, e)),
        }
    }

    async fn list_files(&self, dir: &VirtualPath) -> MapStoreResult<Vec<VirtualPath>> {
        let prefix = if dir.is_root() {
            "/".to_string()
        } else {
            dir.dir_prefix()
        };
        let entries = match self.op.list_with(&prefix).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(dir, e)),
        };

        let mut files: Vec<VirtualPath> = entries
            .iter()
            .filter(|entry| entry.metadata().is_file())
            .filter_map(|entry| VirtualPath::parse(entry.path()).ok())
            .filter(|path| !path.is_root())
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_fs() -> OpendalFileSystem {
        OpendalFileSystem::new(
            Operator::new(opendal::services::Memory::default())
                .expect("memory operator")
                .finish(),
        )
    }

    fn p(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let fs = memory_fs();
        let err = fs.read_to_string(&p("nope.wam")).await.unwrap_err();
        assert!(matches!(err, MapStoreError::NotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn write_then_list() {
        let fs = memory_fs();
        fs.write_string(&p("rooms/a/map.tmj"), "{}".into()).await.unwrap();
        fs.write_string(&p("rooms/a/tiles/t.png"), "png".into()).await.unwrap();
        fs.write_string(&p("rooms/b/map.tmj"), "{}".into()).await.unwrap();

        let files = fs.list_files(&p("rooms/a")).await.unwrap();
        assert_eq!(files, vec![p("rooms/a/map.tmj"), p("rooms/a/tiles/t.png")]);
        assert_eq!(fs.list_files(&VirtualPath::root()).await.unwrap().len(), 3);
        assert!(fs.list_files(&p("rooms/zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_except_wam_keeps_metadata() {
        let fs = memory_fs();
        fs.write_string(&p("d/map.tmj"), "{}".into()).await.unwrap();
        fs.write_string(&p("d/map.wam"), "{}".into()).await.unwrap();
        fs.write_string(&p("d/keep.png"), "x".into()).await.unwrap();
        fs.write_string(&p("d/old.png"), "x".into()).await.unwrap();

        fs.delete_files_except_wam(&p("d"), &[p("d/keep.png")])
            .await
            .unwrap();

        let left = fs.list_files(&p("d")).await.unwrap();
        assert_eq!(left, vec![p("d/keep.png"), p("d/map.wam")]);
    }

    #[tokio::test]
    async fn copy_refuses_existing_destination() {
        let fs = memory_fs();
        fs.write_string(&p("a.tmj"), "1".into()).await.unwrap();
        fs.write_string(&p("b.tmj"), "2".into()).await.unwrap();

        let err = fs.copy_path(&p("a.tmj"), &p("b.tmj")).await.unwrap_err();
        assert!(matches!(err, MapStoreError::Conflict(_)));
        assert_eq!(fs.read_to_string(&p("b.tmj")).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn move_directory_tree() {
        let fs = memory_fs();
        fs.write_string(&p("src/map.tmj"), "m".into()).await.unwrap();
        fs.write_string(&p("src/img/a.png"), "a".into()).await.unwrap();

        fs.move_path(&p("src"), &p("dst")).await.unwrap();

        assert!(fs.list_files(&p("src")).await.unwrap().is_empty());
        assert_eq!(fs.read_to_string(&p("dst/img/a.png")).await.unwrap(), "a");
        assert_eq!(fs.read_to_string(&p("dst/map.tmj")).await.unwrap(), "m");
    }

    #[tokio::test]
    async fn writable_check_leaves_nothing_behind() {
        let fs = memory_fs();
        fs.write_string(&p("rooms/map.wam"), "{}".into()).await.unwrap();

        fs.check_writable().await.unwrap();
        fs.check_writable().await.unwrap();
        assert_eq!(
            fs.list_files(&VirtualPath::root()).await.unwrap(),
            vec![p("rooms/map.wam")]
        );
    }

    #[tokio::test]
    async fn copy_missing_source_is_not_found() {
        let fs = memory_fs();
        let err = fs.copy_path(&p("ghost"), &p("dst")).await.unwrap_err();
        assert!(matches!(err, MapStoreError::NotFound(_)));
    }
}
