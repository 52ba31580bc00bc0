use std::time::Instant;

use crate::cache::{ParallelProcessor, TaskSet};
use crate::commands::CommandContext;

pub async fn run(context: &CommandContext, count: u64, workers: Option<usize>) -> anyhow::Result<()> {
    let workers = workers.unwrap_or(context.config.parallel.max_workers);
    let processor = ParallelProcessor::new(workers)?;

    let mut tasks = TaskSet::new();
    for x in 0..count {
        tasks.insert(format!("square_{}", x), move || Ok(x * x))?;
    }

    let start = Instant::now();
    let squares = processor.execute_parallel(tasks).await?;
    let elapsed = start.elapsed();

    let total: u64 = squares.values().sum();
    println!(
        "map: {} items on {} workers in {:.2?} (sum of squares {})",
        squares.len(),
        processor.max_workers(),
        elapsed,
        total
    );

    let stats = processor.stats().await;
    println!(
        "pool: {} tasks, {} completed, {} failed",
        stats.total_tasks, stats.completed_tasks, stats.failed_tasks
    );
    Ok(())
}
