use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line and environment surface. Every option is optional here;
/// unset values fall back to the config file and then to defaults, so the
/// effective precedence is flags > env > file > defaults.
#[derive(Debug, Parser)]
#[command(name = "vitals-agent", about = "Host metrics collection agent")]
pub struct Cli {
    /// Log verbosity: debug or info
    #[arg(long = "log-level", env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Server base address to report to
    #[arg(short = 'a', long = "address", env = "ADDRESS")]
    address: Option<String>,

    /// Metric poll interval in seconds
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Report interval in seconds
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// Shared secret for request signing
    #[arg(short = 'k', long = "secret-key", env = "KEY")]
    secret_key: Option<String>,

    /// Number of concurrent report workers
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Path to the server's public key for request encryption
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// gRPC server address; selects the RPC transport when set
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
    poll_interval: Option<u64>,
    report_interval: Option<u64>,
    secret_key: Option<String>,
    rate_limit: Option<usize>,
    crypto_key: Option<PathBuf>,
    grpc_server_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub log_level: String,
    pub address: String,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub secret_key: Option<String>,
    pub rate_limit: usize,
    pub crypto_key: Option<PathBuf>,
    pub grpc_server_address: Option<String>,
}

impl AgentConfig {
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

        let address = cli
            .address
            .or(file.address)
            .unwrap_or_else(|| "localhost:8080".to_string());
        let address = if address.contains("://") {
            address
        } else {
            format!("http://{address}")
        };

        Ok(Self {
            log_level: cli
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            address,
            poll_interval: Duration::from_secs(cli.poll_interval.or(file.poll_interval).unwrap_or(2)),
            report_interval: Duration::from_secs(
                cli.report_interval.or(file.report_interval).unwrap_or(10),
            ),
            secret_key: cli.secret_key.or(file.secret_key).filter(|k| !k.is_empty()),
            rate_limit: cli.rate_limit.or(file.rate_limit).unwrap_or(1).max(1),
            crypto_key: cli.crypto_key.or(file.crypto_key),
            grpc_server_address: cli.grpc_server_address.or(file.grpc_server_address),
        })
    }

    pub fn debug(&self) {
        tracing::debug!(
            log_level = %self.log_level,
            address = %self.address,
            poll_interval = ?self.poll_interval,
            report_interval = ?self.report_interval,
            rate_limit = self.rate_limit,
            grpc = self.grpc_server_address.as_deref().unwrap_or("-"),
            "agent config"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = Cli::parse_from(["vitals-agent"]);
        let config = AgentConfig::resolve(cli).unwrap();

        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.rate_limit, 1);
        assert!(config.secret_key.is_none());
        assert!(config.grpc_server_address.is_none());
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "address = \"filehost:9000\"\npoll_interval = 30\n").unwrap();

        let cli = Cli::parse_from([
            "vitals-agent",
            "-a",
            "flaghost:8000",
            "-c",
            path.to_str().unwrap(),
        ]);
        let config = AgentConfig::resolve(cli).unwrap();

        // flag wins over file, file wins over default
        assert_eq!(config.address, "http://flaghost:8000");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn scheme_is_preserved_when_present() {
        let cli = Cli::parse_from(["vitals-agent", "-a", "https://secure:8443"]);
        let config = AgentConfig::resolve(cli).unwrap();
        assert_eq!(config.address, "https://secure:8443");
    }

    #[test]
    fn empty_secret_key_counts_as_unset() {
        let cli = Cli::parse_from(["vitals-agent", "-k", ""]);
        let config = AgentConfig::resolve(cli).unwrap();
        assert!(config.secret_key.is_none());
    }
}
