pub mod batch;
pub mod codec;
pub mod map;
pub mod query;

use std::sync::Arc;

use crate::cache::{CacheFunction, CacheOptions, CacheTiers, MemoryGateway, PayloadCodec};
use crate::cli::args::Command;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::Result;
use crate::infrastructure::metrics::{InMemoryMetrics, MetricsSink};

/// Shared state for one CLI invocation
pub struct CommandContext {
    pub config: EngineConfig,
    pub gateway: Arc<MemoryGateway>,
    pub metrics: Arc<InMemoryMetrics>,
}

impl CommandContext {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let gateway = Arc::new(MemoryGateway::from_settings(&config.cache)?);
        Ok(Self {
            config,
            gateway,
            metrics: Arc::new(InMemoryMetrics::new()),
        })
    }

    /// Memoizer backed by the in-memory gateway and reporting to the context metrics
    pub fn cache_function(&self) -> Arc<CacheFunction> {
        let metrics: Arc<dyn MetricsSink> = self.metrics.clone();
        let cache = CacheFunction::new(
            CacheTiers::shared(self.gateway.clone()),
            CacheOptions::from_settings(&self.config.cache),
        )
        .with_codec(PayloadCodec::from_settings(&self.config.cache))
        .with_metrics(metrics);

        Arc::new(cache)
    }

    pub fn print_summary(&self) {
        println!(
            "cache: {} hits, {} misses, {} errors, {} entries",
            self.metrics.count_status("hit"),
            self.metrics.count_status("miss"),
            self.metrics.errors().len(),
            self.gateway.len().unwrap_or(0)
        );
    }
}

/// Dispatch a parsed subcommand
pub async fn route_command(command: &Command, context: &CommandContext) -> anyhow::Result<()> {
    match command {
        Command::Map { count, workers } => map::run(context, *count, *workers).await,
        Command::Batch {
            items,
            batch_size,
            delay_ms,
        } => batch::run(context, *items, *batch_size, *delay_ms).await,
        Command::Query { keys, limit } => query::run(context, keys, *limit).await,
        Command::Codec { elements, width } => codec::run(context, *elements, *width),
    }
}
