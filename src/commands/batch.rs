use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{memoize, try_parallel_map, DataBatcher};
use crate::commands::CommandContext;

pub async fn run(
    context: &CommandContext,
    items: u64,
    batch_size: Option<usize>,
    delay_ms: u64,
) -> anyhow::Result<()> {
    let batcher = match batch_size {
        Some(size) => DataBatcher::new(size)?,
        None => DataBatcher::from_settings(&context.config.batch)?,
    };
    let workers = context.config.parallel.max_workers;

    let process_batch = Arc::new(memoize(
        "process_batch",
        move |(batch, delay_ms): (Vec<u64>, u64)| async move {
            let doubled = try_parallel_map(
                move |x: u64| {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    Ok(x * 2)
                },
                batch,
                workers,
            )
            .await?;
            Ok::<_, anyhow::Error>(doubled)
        },
        context.cache_function(),
    ));

    let data: Vec<u64> = (0..items).collect();
    for pass in ["cold", "warm"] {
        let start = Instant::now();
        let results: Vec<u64> = batcher
            .process_batches(data.clone(), |batch| {
                let process_batch = Arc::clone(&process_batch);
                async move {
                    let doubled: Vec<u64> = process_batch.call((batch, delay_ms)).await?;
                    Ok(doubled)
                }
            })
            .await?;

        println!(
            "batch ({}): {} items in {} batches in {:.2?}",
            pass,
            results.len(),
            batcher.batch_count(data.len()),
            start.elapsed()
        );
    }
    Ok(())
}
