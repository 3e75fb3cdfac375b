use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration (loaded from mapstore.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapStoreConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API listen address (default: 0.0.0.0:3000)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory (`storage.directory`)
    Fs,
    /// S3-compatible object store
    S3,
    /// Process memory, lost on restart (tests, demos)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub directory: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Maximum number of archive entries written concurrently
    pub upload_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Ceiling for request bodies and for the summed uncompressed size of an archive
    pub max_uncompressed_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Prefix every stored path with the request hostname
    pub use_domain_name_in_path: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            directory: PathBuf::from("./public"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "maps".into(),
            enforce_tls: false,
            upload_concurrency: 100,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_uncompressed_size: 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:8080"
log_level = "debug"
log_format = "text"

[storage]
backend = "s3"
endpoint = "https://s3.example.com"
region = "eu-west-3"
bucket = "workadventure-maps"
enforce_tls = true
upload_concurrency = 8

[upload]
max_uncompressed_size = 52428800

[paths]
use_domain_name_in_path = true
"#;
        let config: MapStoreConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.bucket, "workadventure-maps");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.upload_concurrency, 8);
        assert_eq!(config.upload.max_uncompressed_size, 52_428_800);
        assert!(config.paths.use_domain_name_in_path);
    }

    #[test]
    fn test_parse_defaults() {
        let config: MapStoreConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.directory, PathBuf::from("./public"));
        assert_eq!(config.storage.upload_concurrency, 100);
        assert_eq!(config.upload.max_uncompressed_size, 1 << 30);
        assert!(!config.paths.use_domain_name_in_path);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
backend = "memory"
"#;
        let config: MapStoreConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        // Defaults
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.server.log_level, "info");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml_str = r#"
[storage]
backend = "ftp"
"#;
        assert!(toml::from_str::<MapStoreConfig>(toml_str).is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = MapStoreConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MapStoreConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.listen, parsed.server.listen);
        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(
            config.upload.max_uncompressed_size,
            parsed.upload.max_uncompressed_size
        );
    }
}
