use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "parallel-cache",
    version,
    about = "Drive the parallel execution and memoization engine against an in-memory cache",
    long_about = "parallel-cache runs small workloads through the worker pool, the batcher, the query batcher and the payload codec, memoizing results in an in-memory gateway and printing cold and warm timings."
)]
pub struct Args {
    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Square integers on the worker pool
    Map {
        /// Number of integers to map
        #[arg(long, default_value_t = 16)]
        count: u64,

        /// Pool size; defaults to the configured max_workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Process items in batches with memoized per-batch work
    Batch {
        #[arg(long, default_value_t = 5)]
        items: u64,

        /// Defaults to the configured batch_size
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,

        /// Simulated blocking work per item
        #[arg(long = "delay-ms", default_value_t = 50)]
        delay_ms: u64,
    },

    /// Run memoized lookups through the query batcher
    Query {
        /// Comma separated keys
        #[arg(long, value_delimiter = ',', default_value = "10,20,30,40,50")]
        keys: Vec<u64>,

        /// Defaults to the configured concurrency_limit
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Encode a generated payload and report the compression outcome
    Codec {
        #[arg(long, default_value_t = 20)]
        elements: usize,

        /// Characters per element
        #[arg(long, default_value_t = 1000)]
        width: usize,
    },
}
