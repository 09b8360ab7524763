use anyhow::Result;
use tracing_subscriber::EnvFilter;
use vitals_server::config::ServerConfig;
use vitals_server::run;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;

    let directive = format!("vitals={}", config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    if config.log_level == "debug" {
        config.debug();
    }

    tracing::info!(address = %config.address, "starting server");
    run::run(config).await
}
