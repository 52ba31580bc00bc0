use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{memoize, AsyncQueryBatcher};
use crate::commands::CommandContext;

pub async fn run(context: &CommandContext, keys: &[u64], limit: Option<usize>) -> anyhow::Result<()> {
    let batcher = match limit {
        Some(limit) => AsyncQueryBatcher::new(limit)?,
        None => AsyncQueryBatcher::from_settings(&context.config.query)?,
    };

    let lookup = Arc::new(memoize(
        "lookup",
        |(key,): (u64,)| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, anyhow::Error>(format!("value-{}", key))
        },
        context.cache_function(),
    ));

    for pass in ["cold", "warm"] {
        let queries: Vec<_> = keys
            .iter()
            .map(|&key| {
                let lookup = Arc::clone(&lookup);
                move || async move {
                    let value: String = lookup.call((key,)).await?;
                    Ok((key, value))
                }
            })
            .collect();

        let start = Instant::now();
        let results = batcher.execute_queries(queries).await?;
        println!(
            "query ({}): {} results with limit {} in {:.2?}",
            pass,
            results.len(),
            batcher.concurrency_limit(),
            start.elapsed()
        );
    }
    Ok(())
}
