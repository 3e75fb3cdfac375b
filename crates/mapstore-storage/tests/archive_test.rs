//! Integration test: directory → streamed zip → unpacked entries
//!
//! Runs against OpenDAL's in-memory backend and the local fs backend so no
//! object store is required.

use futures::StreamExt;
use mapstore_core::config::{StorageBackend, StorageConfig};
use mapstore_core::VirtualPath;
use mapstore_storage::{archive_stream, build_operator, FileSystem, OpendalFileSystem};
use opendal::Operator;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_fs() -> Arc<OpendalFileSystem> {
    Arc::new(OpendalFileSystem::new(
        Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish(),
    ))
}

fn p(s: &str) -> VirtualPath {
    VirtualPath::parse(s).unwrap()
}

async fn collect(fs: Arc<OpendalFileSystem>, dir: &str) -> Vec<u8> {
    let mut stream = archive_stream(fs, p(dir));
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("archive chunk"));
    }
    out
}

fn entries(zip_bytes: Vec<u8>) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes)).expect("valid zip");
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        out.push((file.name().to_string(), content));
    }
    out.sort();
    out
}

#[tokio::test]
async fn archive_contains_directory_files_relative_to_root() {
    let fs = memory_fs();
    fs.write_string(&p("rooms/a/map.tmj"), "{\"type\":\"map\"}".into())
        .await
        .unwrap();
    fs.write_string(&p("rooms/a/img/tiles.png"), "png".into())
        .await
        .unwrap();
    fs.write_string(&p("rooms/b/other.tmj"), "other".into())
        .await
        .unwrap();

    let files = entries(collect(fs, "rooms/a").await);
    assert_eq!(
        files,
        vec![
            ("img/tiles.png".to_string(), "png".to_string()),
            ("map.tmj".to_string(), "{\"type\":\"map\"}".to_string()),
        ]
    );
}

#[tokio::test]
async fn archive_skips_hidden_files() {
    let fs = memory_fs();
    fs.write_string(&p("map.tmj"), "m".into()).await.unwrap();
    fs.write_string(&p(".cache/example.com.json"), "{}".into())
        .await
        .unwrap();

    let files = entries(collect(fs, "").await);
    assert_eq!(files, vec![("map.tmj".to_string(), "m".to_string())]);
}

#[tokio::test]
async fn empty_directory_yields_empty_archive() {
    let fs = memory_fs();
    let files = entries(collect(fs, "nothing/here").await);
    assert!(files.is_empty());
}

#[tokio::test]
async fn fs_backend_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let storage = StorageConfig {
        backend: StorageBackend::Fs,
        directory: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let fs = OpendalFileSystem::new(build_operator(&storage, None).unwrap());

    fs.write_string(&p("rooms/a/map.wam"), "wam".into())
        .await
        .unwrap();
    assert!(tmp.path().join("rooms/a/map.wam").exists());
    assert!(fs.exists(&p("rooms/a")).await.unwrap());
    assert!(fs.is_file(&p("rooms/a/map.wam")).await.unwrap());
    assert!(!fs.is_file(&p("rooms/a")).await.unwrap());

    fs.delete_files(&p("rooms")).await.unwrap();
    assert!(!tmp.path().join("rooms/a/map.wam").exists());
    assert!(!fs.exists(&p("rooms/a/map.wam")).await.unwrap());
}

#[tokio::test]
async fn compression_does_not_stall_the_runtime() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    let fs = memory_fs();
    // xorshift noise: slow to deflate at level 9
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let data: Vec<u8> = (0..4 * 1024 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 16) as u8 + b'a'
        })
        .collect();
    fs.write(&p("big/tiles.png"), data.into()).await.unwrap();

    let worst = Arc::new(AtomicU64::new(0));
    let ticker = {
        let worst = worst.clone();
        tokio::spawn(async move {
            let mut last = Instant::now();
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let gap = last.elapsed().as_millis() as u64;
                worst.fetch_max(gap, Ordering::Relaxed);
                last = Instant::now();
            }
        })
    };

    let archive = collect(fs, "big").await;
    ticker.abort();

    assert!(!archive.is_empty());
    let stall = worst.load(Ordering::Relaxed);
    assert!(stall < 500, "runtime stalled for {stall} ms");
}
