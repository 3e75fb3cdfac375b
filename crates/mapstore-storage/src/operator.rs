//! OpenDAL Operator factory for mapstore storage backends

use anyhow::{Context, Result};
use mapstore_core::config::{StorageBackend, StorageConfig};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

/// S3 credentials, loaded from the environment by the daemon.
#[derive(Debug)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Minimal settings needed to build an S3 operator
#[derive(Debug, Clone)]
struct S3Settings<'a> {
    endpoint: &'a str,
    region: &'a str,
    bucket: &'a str,
    credentials: Option<&'a S3Credentials>,
}

/// Build an OpenDAL Operator for an S3-compatible endpoint.
///
/// Uses path-style addressing (default in opendal 0.55), which is required by
/// MinIO and SeaweedFS. Without explicit credentials the S3 service falls
/// back to its own environment/profile discovery.
fn build_s3_operator(cfg: &S3Settings<'_>) -> Result<Operator> {
    // opendal 0.55: builders use consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .endpoint(cfg.endpoint)
        .region(cfg.region)
        .bucket(cfg.bucket);
    if let Some(creds) = cfg.credentials {
        builder = builder
            .access_key_id(&creds.access_key_id)
            .secret_access_key(creds.secret_access_key.expose_secret());
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator for the configured backend.
pub fn build_operator(
    storage: &StorageConfig,
    credentials: Option<&S3Credentials>,
) -> Result<Operator> {
    match storage.backend {
        StorageBackend::Fs => {
            let root = storage.directory.to_string_lossy();
            let builder = opendal::services::Fs::default().root(&root);
            Ok(Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
                .layer(opendal::layers::LoggingLayer::default())
                .finish())
        }
        StorageBackend::Memory => Ok(Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish()),
        StorageBackend::S3 => build_s3_operator(&S3Settings {
            endpoint: &storage.endpoint,
            region: &storage.region,
            bucket: &storage.bucket,
            credentials,
        }),
    }
}

/// Build an operator from mapstore-core config + loaded credentials.
///
/// If `enforce_tls` is true and the S3 endpoint uses HTTP, this returns an
/// error. Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &StorageConfig,
    credentials: Option<&S3Credentials>,
) -> Result<Operator> {
    if storage.backend == StorageBackend::S3 && storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(storage, credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: SecretString::from("test-secret"),
        }
    }

    #[test]
    fn test_build_s3_operator_valid() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:9000".into(),
            ..Default::default()
        };
        let op = build_operator(&storage, Some(&creds()));
        assert!(op.is_ok(), "operator construction should succeed");
    }

    #[test]
    fn test_build_fs_operator() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            backend: StorageBackend::Fs,
            directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_build_from_core_config_http_enforce_tls() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let result = build_from_core_config(&storage, Some(&creds()));
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(
            result.unwrap_err().to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_build_from_core_config_https() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_enforce_tls_ignored_for_memory() {
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            endpoint: "http://unused".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, None).is_ok());
    }
}
