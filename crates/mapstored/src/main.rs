//! mapstored: map storage daemon
//!
//! Usage:
//!   mapstored [--config mapstore.toml] [--log debug] [--log-format text]
//!
//! Secrets come from the environment only:
//!   MAPSTORE_API_KEY                            - bearer key for mutating endpoints
//!   AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY   - S3 backend credentials

use anyhow::Result;
use clap::{Parser, ValueEnum};
use mapstore_core::config::MapStoreConfig;
use mapstore_storage::S3Credentials;
use mapstored::daemon::{self, Secrets};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mapstored", version, about = "Map storage daemon")]
struct Cli {
    /// Path to mapstore.toml configuration file
    #[arg(long, short = 'c', env = "MAPSTORE_CONFIG", default_value = "mapstore.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides server.log_level
    #[arg(long, env = "MAPSTORE_LOG")]
    log: Option<String>,

    /// Log format; overrides server.log_format
    #[arg(long, env = "MAPSTORE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// API key required on mutating endpoints
    #[arg(long, env = "MAPSTORE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load_config(&cli.config).await?;
    let config = loaded.clone().unwrap_or_default();

    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.server.log_format.as_str() {
        "text" => LogFormat::Text,
        _ => LogFormat::Json,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "mapstored starting"
    );
    if loaded.is_none() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    let s3 = match (cli.access_key_id, cli.secret_access_key) {
        (Some(access_key_id), Some(secret)) => Some(S3Credentials {
            access_key_id,
            secret_access_key: SecretString::from(secret),
        }),
        _ => None,
    };
    let secrets = Secrets {
        s3,
        api_key: cli.api_key.map(SecretString::from),
    };

    daemon::run(config, secrets).await
}

/// `None` if the file does not exist.
async fn load_config(path: &Path) -> Result<Option<MapStoreConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
}

/// `level` for mapstore itself; OpenDAL logs every storage call at debug,
/// so it stays at warn unless RUST_LOG says otherwise.
fn default_directives(level: &str) -> String {
    format!("{level},opendal=warn")
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
