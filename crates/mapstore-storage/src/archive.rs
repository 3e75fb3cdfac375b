//! Streamed zip archives of a stored directory.
//!
//! Files are read and compressed one at a time; compressed bytes are handed
//! to the consumer after each file, so memory use is bounded by the largest
//! single file rather than the whole directory. Deflate runs on the blocking
//! pool so a large file does not stall the runtime's workers.

use bytes::Bytes;
use mapstore_core::{MapStoreError, MapStoreResult, VirtualPath};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::filesystem::FileSystem;

pub type ArchiveStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Write sink shared with the zip writer so that finished bytes can be
/// drained between files.
#[derive(Clone, Default)]
struct ChunkBuffer(Arc<Mutex<Vec<u8>>>);

impl ChunkBuffer {
    fn take(&self) -> io::Result<Bytes> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("archive buffer poisoned"))?;
        Ok(Bytes::from(std::mem::take(&mut *buf)))
    }
}

impl Write for ChunkBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("archive buffer poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn zip_err(e: zip::result::ZipError) -> MapStoreError {
    MapStoreError::Storage(format!("building archive: {e}"))
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
}

/// Run a compression step on the blocking pool, handing the writer back.
async fn deflate<Z, F>(zip: Z, step: F) -> MapStoreResult<Z>
where
    Z: Send + 'static,
    F: FnOnce(&mut Z) -> MapStoreResult<()> + Send + 'static,
{
    task::spawn_blocking(move || {
        let mut zip = zip;
        step(&mut zip)?;
        Ok(zip)
    })
    .await
    .map_err(|e| MapStoreError::Other(anyhow::anyhow!("archive compression failed: {e}")))?
}

async fn drain(buffer: &ChunkBuffer, sink: &mpsc::Sender<io::Result<Bytes>>) -> MapStoreResult<()> {
    let chunk = buffer.take()?;
    if chunk.is_empty() {
        return Ok(());
    }
    sink.send(Ok(chunk))
        .await
        .map_err(|_| MapStoreError::Storage("archive consumer went away".into()))
}

/// Zip every file below `dir` into `sink`. Entry names are relative to `dir`;
/// hidden files (including the listing cache) are left out.
///
/// Returns the number of files archived.
pub async fn archive_directory<F: FileSystem + ?Sized>(
    fs: &F,
    dir: &VirtualPath,
    sink: &mpsc::Sender<io::Result<Bytes>>,
) -> MapStoreResult<usize> {
    let buffer = ChunkBuffer::default();
    let mut zip = ZipWriter::new_stream(buffer.clone());

    let mut count = 0usize;
    for file in fs.list_files(dir).await? {
        let Some(rel) = file.strip_prefix(dir) else {
            continue;
        };
        if rel.is_hidden() {
            continue;
        }
        let data = fs.read(&file).await?;
        let name = rel.as_str().to_string();
        zip = deflate(zip, move |zip| {
            zip.start_file(name, entry_options()).map_err(zip_err)?;
            zip.write_all(&data)?;
            Ok(())
        })
        .await?;
        drain(&buffer, sink).await?;
        count += 1;
    }

    task::spawn_blocking(move || zip.finish().map_err(zip_err))
        .await
        .map_err(|e| MapStoreError::Other(anyhow::anyhow!("archive compression failed: {e}")))??;
    drain(&buffer, sink).await?;
    info!(dir = %dir, files = count, "archive streamed");
    Ok(count)
}

/// Spawn [`archive_directory`] and expose its output as a byte stream.
///
/// A failure after streaming started surfaces as an `Err` item; the
/// consumer sees a truncated archive.
pub fn archive_stream(fs: Arc<dyn FileSystem>, dir: VirtualPath) -> ArchiveStream {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        if let Err(e) = archive_directory(fs.as_ref(), &dir, &tx).await {
            warn!(dir = %dir, "archive failed: {e}");
            let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
        }
    });
    Box::pin(ReceiverStream::new(rx))
}
