use clap::Parser;
use parallel_cache::cli::args::Args;
use parallel_cache::commands::{route_command, CommandContext};
use parallel_cache::infrastructure::config::{ConfigManager, ConfigSource};
use parallel_cache::infrastructure::logging::{setup_logging, LoggingConfig};
use std::collections::HashMap;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::new();
    if let Some(path) = &args.config {
        anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
        manager = manager.add_source(ConfigSource::File(path.clone()));
    }
    manager = manager.add_source(ConfigSource::Environment);
    if let Some(level) = &args.log_level {
        let overrides = HashMap::from([("log-level".to_string(), level.clone())]);
        manager = manager.add_source(ConfigSource::Overrides(overrides));
    }
    let config = manager.load()?.clone();

    setup_logging(LoggingConfig::from_settings(&config.logging)?)?;
    info!("parallel-cache {} starting", parallel_cache::VERSION);

    let context = CommandContext::new(config)?;
    route_command(&args.command, &context).await?;
    context.print_summary();

    Ok(())
}
