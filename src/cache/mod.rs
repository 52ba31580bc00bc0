pub mod batch;
mod canonical;
pub mod codec;
pub mod gateway;
pub mod key;
pub mod memoize;
pub mod parallel;
pub mod query;

pub use batch::DataBatcher;
pub use codec::{PayloadCodec, COMPRESSED_MARKER};
pub use gateway::{CacheGateway, CacheLevel, CacheTiers, MemoryGateway};
pub use key::{CacheKeyBuilder, CallArgs};
pub use memoize::{memoize, CacheFunction, CacheOptions, Memoized};
pub use parallel::{
    parallel_map, parallel_map_with, try_parallel_map, BlockingTask, ParallelProcessor,
    ParallelStats, TaskSet,
};
pub use query::AsyncQueryBatcher;
