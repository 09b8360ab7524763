use anyhow::Result;
use tracing_subscriber::EnvFilter;
use vitals_agent::config::AgentConfig;
use vitals_agent::pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load()?;

    let directive = format!("vitals={}", config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    if config.log_level == "debug" {
        config.debug();
    }

    tracing::info!("starting agent");
    pipeline::run(config).await
}
