use std::future::Future;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::infrastructure::config::BatchSettings;
use crate::infrastructure::error::{EngineError, Result};

/// Splits an item sequence into fixed-size batches and drives an async handler over them
#[derive(Debug, Clone)]
pub struct DataBatcher {
    batch_size: usize,
    concurrency: usize,
}

impl DataBatcher {
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EngineError::config("batch_size must be positive"));
        }

        Ok(Self {
            batch_size,
            concurrency: 1,
        })
    }

    /// Allow up to `concurrency` batches in flight. Output order is unaffected.
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(EngineError::config("batch concurrency must be positive"));
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    pub fn from_settings(settings: &BatchSettings) -> Result<Self> {
        Self::new(settings.batch_size)?.with_concurrency(settings.concurrency)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_count(&self, items: usize) -> usize {
        (items + self.batch_size - 1) / self.batch_size
    }

    /// Contiguous batches in original order; the last one may be shorter
    pub fn partition<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let mut batches = Vec::with_capacity(self.batch_count(items.len()));
        let mut remaining = items.into_iter();
        loop {
            let batch: Vec<T> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        batches
    }

    /// Run `handler` once per batch and concatenate the results in batch order.
    ///
    /// Each handler call must return exactly one result per input item, in input order.
    /// The first failing batch aborts the batches still in flight.
    pub async fn process_batches<T, R, F, Fut>(&self, items: Vec<T>, handler: F) -> Result<Vec<R>>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<R>>>,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let batches = self.partition(items);
        info!(
            "Processing {} items in {} batches of up to {}",
            total,
            batches.len(),
            self.batch_size
        );

        let mut handler = handler;
        let per_batch: Vec<Vec<R>> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                let expected = batch.len();
                debug!("Dispatching batch {} with {} items", index, expected);
                let pending = handler(batch);
                async move {
                    let results = pending
                        .await
                        .map_err(|cause| EngineError::task(format!("batch[{}]", index), cause))?;
                    if results.len() != expected {
                        return Err(EngineError::task(
                            format!("batch[{}]", index),
                            anyhow::anyhow!(
                                "handler returned {} results for {} items",
                                results.len(),
                                expected
                            ),
                        ));
                    }
                    Ok(results)
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let combined: Vec<R> = per_batch.into_iter().flatten().collect();
        info!("Completed batch processing of {} items", combined.len());
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::parallel::{ParallelProcessor, TaskSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_partition_is_contiguous() {
        let batcher = DataBatcher::new(3).unwrap();
        let batches = batcher.partition((1..=8).collect::<Vec<_>>());
        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]);
        assert_eq!(batcher.batch_count(8), 3);
        assert_eq!(batcher.batch_count(9), 3);
        assert_eq!(batcher.batch_count(0), 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(DataBatcher::new(0), Err(EngineError::Configuration { .. })));
        assert!(DataBatcher::new(2).unwrap().with_concurrency(0).is_err());
    }

    #[tokio::test]
    async fn test_output_mirrors_input_for_any_batch_size() {
        let items: Vec<u32> = (0..23).collect();
        for batch_size in [1, 2, 5, 7, 23, 50] {
            let batcher = DataBatcher::new(batch_size).unwrap();
            let results = batcher
                .process_batches(items.clone(), |batch| async move {
                    Ok(batch.into_iter().map(|x| x * 10).collect())
                })
                .await
                .unwrap();

            let expected: Vec<u32> = items.iter().map(|x| x * 10).collect();
            assert_eq!(results, expected, "batch_size {}", batch_size);
        }
    }

    #[tokio::test]
    async fn test_empty_items_skip_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let batcher = DataBatcher::new(4).unwrap();

        let counter = Arc::clone(&calls);
        let results: Vec<u8> = batcher
            .process_batches(Vec::<u8>::new(), move |batch| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(batch) }
            })
            .await
            .unwrap();

        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_batches_keep_order() {
        let batcher = DataBatcher::new(2).unwrap().with_concurrency(4).unwrap();
        let results = batcher
            .process_batches((0..10u64).collect(), |batch| async move {
                // later batches finish first
                tokio::time::sleep(Duration::from_millis(50 - batch[0] * 5)).await;
                Ok(batch)
            })
            .await
            .unwrap();

        assert_eq!(results, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_handler_failure_names_batch() {
        let batcher = DataBatcher::new(2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<Vec<i32>> = batcher
            .process_batches(vec![1, 2, 3, 4, 5, 6], move |batch| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if batch.contains(&3) {
                        anyhow::bail!("cannot handle 3");
                    }
                    Ok(batch)
                }
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.task_name(), Some("batch[1]"));
        // sequential batching never starts the batch after the failure
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_result_count_mismatch_is_error() {
        let batcher = DataBatcher::new(3).unwrap();
        let result: Result<Vec<i32>> = batcher
            .process_batches(vec![1, 2, 3], |_batch| async move { Ok(vec![1]) })
            .await;

        assert!(matches!(result, Err(EngineError::TaskExecution { .. })));
    }

    #[tokio::test]
    async fn test_handler_composes_parallel_processor() {
        let batcher = DataBatcher::new(3).unwrap();
        let results = batcher
            .process_batches((1..=7u64).collect(), |batch| async move {
                let processor = ParallelProcessor::new(batch.len())?;
                let mut tasks = TaskSet::new();
                for item in &batch {
                    let item = *item;
                    tasks.insert(format!("item_{}", item), move || Ok(item * item))?;
                }
                let mut by_name = processor.execute_parallel(tasks).await?;
                batch
                    .iter()
                    .map(|item| {
                        by_name
                            .remove(&format!("item_{}", item))
                            .ok_or_else(|| anyhow::anyhow!("missing result for {}", item))
                    })
                    .collect()
            })
            .await
            .unwrap();

        assert_eq!(results, vec![1, 4, 9, 16, 25, 36, 49]);
    }
}
