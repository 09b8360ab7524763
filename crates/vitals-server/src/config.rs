use crate::subnet::TrustedSubnet;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line and environment surface; unset values fall back to the
/// config file and then to defaults (precedence flags > env > file >
/// defaults).
#[derive(Debug, Parser)]
#[command(name = "vitals-server", about = "Metrics collection server")]
pub struct Cli {
    /// Log verbosity: debug or info
    #[arg(long = "log-level", env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Address to listen on
    #[arg(short = 'a', long = "address", env = "ADDRESS")]
    address: Option<String>,

    /// Snapshot interval in seconds
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Restore metrics from the snapshot file at startup
    #[arg(
        short = 'r',
        long = "restore",
        env = "RESTORE",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    restore: Option<bool>,

    /// PostgreSQL DSN; the in-memory store is used when unset
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared secret for request signature verification
    #[arg(short = 'k', long = "secret-key", env = "KEY")]
    secret_key: Option<String>,

    /// File to append audit events to
    #[arg(long = "audit-file", env = "AUDIT_FILE")]
    audit_file: Option<PathBuf>,

    /// URL to POST audit events to
    #[arg(long = "audit-url", env = "AUDIT_URL")]
    audit_url: Option<String>,

    /// Path to the private key for request decryption
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// CIDR that mutating requests must originate from
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Address for the gRPC listener; the RPC service is disabled when unset
    #[arg(long = "grpc-server-address", env = "GRPC_SERVER_ADDRESS")]
    grpc_server_address: Option<String>,

    /// Optional TOML config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    log_level: Option<String>,
    address: Option<String>,
    store_interval: Option<u64>,
    file_storage_path: Option<PathBuf>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    secret_key: Option<String>,
    audit_file: Option<PathBuf>,
    audit_url: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
    grpc_server_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub log_level: String,
    pub address: String,
    pub store_interval: Duration,
    pub file_storage_path: PathBuf,
    pub restore: bool,
    pub database_dsn: Option<String>,
    pub secret_key: Option<String>,
    pub audit_file: Option<PathBuf>,
    pub audit_url: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<TrustedSubnet>,
    pub grpc_server_address: Option<String>,
}

fn validate_audit_url(url: &str) -> anyhow::Result<()> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| anyhow::anyhow!("invalid audit URL: {url}"))?;

    if rest.is_empty() || rest.starts_with('/') {
        anyhow::bail!("invalid audit URL: {url}");
    }
    Ok(())
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::resolve(Cli::parse())
    }

    fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => FileConfig::default(),
        };

        let audit_url = cli.audit_url.or(file.audit_url).filter(|u| !u.is_empty());
        if let Some(url) = &audit_url {
            validate_audit_url(url)?;
        }

        let trusted_subnet = cli
            .trusted_subnet
            .or(file.trusted_subnet)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<TrustedSubnet>()
                    .map_err(|e| anyhow::anyhow!("failed to parse trusted subnet: {e}"))
            })
            .transpose()?;

        Ok(Self {
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            address: cli
                .address
                .or(file.address)
                .unwrap_or_else(|| "localhost:8080".to_string()),
            store_interval: Duration::from_secs(
                cli.store_interval.or(file.store_interval).unwrap_or(300),
            ),
            file_storage_path: cli
                .file_storage_path
                .or(file.file_storage_path)
                .unwrap_or_else(|| PathBuf::from("/tmp/metrics.json")),
            restore: cli.restore.or(file.restore).unwrap_or(false),
            database_dsn: cli
                .database_dsn
                .or(file.database_dsn)
                .filter(|d| !d.is_empty()),
            secret_key: cli.secret_key.or(file.secret_key).filter(|k| !k.is_empty()),
            audit_file: cli.audit_file.or(file.audit_file),
            audit_url,
            crypto_key: cli.crypto_key.or(file.crypto_key),
            trusted_subnet,
            grpc_server_address: cli.grpc_server_address.or(file.grpc_server_address),
        })
    }

    pub fn debug(&self) {
        tracing::debug!(
            log_level = %self.log_level,
            address = %self.address,
            store_interval = ?self.store_interval,
            file_storage_path = %self.file_storage_path.display(),
            restore = self.restore,
            database = self.database_dsn.is_some(),
            trusted_subnet = ?self.trusted_subnet,
            grpc = self.grpc_server_address.as_deref().unwrap_or("-"),
            "server config"
        );
    }
}
