// Parallel execution primitives
pub mod cache;
pub mod cli;
pub mod commands;
// Error, config, logging and metrics plumbing
pub mod infrastructure;

pub use cache::{
    memoize, parallel_map, AsyncQueryBatcher, CacheFunction, CacheGateway, CacheOptions,
    CallArgs, DataBatcher, MemoryGateway, ParallelProcessor, PayloadCodec, TaskSet,
};
pub use infrastructure::{EngineConfig, EngineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
