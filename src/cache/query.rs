use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::cache::parallel::panic_message;
use crate::infrastructure::config::QuerySettings;
use crate::infrastructure::error::{EngineError, Result};

/// Runs async queries under a concurrency cap and gathers their `(key, value)` results.
///
/// Result keys are expected to be unique; when two queries return the same key the one
/// that completes last wins.
#[derive(Debug, Clone)]
pub struct AsyncQueryBatcher {
    concurrency_limit: usize,
}

impl AsyncQueryBatcher {
    pub fn new(concurrency_limit: usize) -> Result<Self> {
        if concurrency_limit == 0 {
            return Err(EngineError::config("concurrency_limit must be positive"));
        }
        Ok(Self { concurrency_limit })
    }

    pub fn from_settings(settings: &QuerySettings) -> Result<Self> {
        Self::new(settings.concurrency_limit)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Admit queries through a counting gate and collect every result.
    ///
    /// The first failing query aborts everything in flight, drops the queued queries and
    /// is returned as a `TaskExecution` error naming its position, e.g. `query[2]`.
    pub async fn execute_queries<Q, Fut, K, V>(&self, queries: Vec<Q>) -> Result<HashMap<K, V>>
    where
        Q: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<(K, V)>> + Send + 'static,
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
    {
        let mut results = HashMap::with_capacity(queries.len());
        if queries.is_empty() {
            return Ok(results);
        }

        info!(
            "Executing {} queries with concurrency limit {}",
            queries.len(),
            self.concurrency_limit
        );

        let gate = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut in_flight: JoinSet<Result<(K, V)>> = JoinSet::new();

        for (index, query) in queries.into_iter().enumerate() {
            let permit = loop {
                tokio::select! {
                    acquired = Arc::clone(&gate).acquire_owned() => {
                        match acquired {
                            Ok(permit) => break permit,
                            Err(_) => {
                                let error = EngineError::task(query_name(index), anyhow::anyhow!("admission gate closed"));
                                return Err(cancel_outstanding(&gate, &mut in_flight, error).await);
                            }
                        }
                    }
                    Some(joined) = in_flight.join_next() => {
                        if let Err(error) = absorb(joined, &mut results) {
                            return Err(cancel_outstanding(&gate, &mut in_flight, error).await);
                        }
                    }
                }
            };

            debug!("Admitting {}", query_name(index));
            in_flight.spawn(async move {
                let _permit = permit;
                match AssertUnwindSafe(async move { query().await }).catch_unwind().await {
                    Ok(outcome) => outcome.map_err(|cause| EngineError::task(query_name(index), cause)),
                    Err(payload) => Err(EngineError::task(
                        query_name(index),
                        anyhow::anyhow!("query panicked: {}", panic_message(payload.as_ref())),
                    )),
                }
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = absorb(joined, &mut results) {
                return Err(cancel_outstanding(&gate, &mut in_flight, error).await);
            }
        }

        info!("Completed {} queries", results.len());
        Ok(results)
    }
}

fn query_name(index: usize) -> String {
    format!("query[{}]", index)
}

fn absorb<K, V>(
    joined: std::result::Result<Result<(K, V)>, JoinError>,
    results: &mut HashMap<K, V>,
) -> Result<()>
where
    K: Eq + Hash,
{
    let (key, value) = match joined {
        Ok(outcome) => outcome?,
        Err(join_error) => {
            return Err(EngineError::task(
                "query",
                anyhow::anyhow!("query task failed: {}", join_error),
            ))
        }
    };

    if results.insert(key, value).is_some() {
        debug!("Duplicate query result key; keeping the latest value");
    }
    Ok(())
}

/// Close the gate, abort every query still running and wait until they are gone
async fn cancel_outstanding<T: 'static>(
    gate: &Semaphore,
    in_flight: &mut JoinSet<T>,
    error: EngineError,
) -> EngineError {
    error!("{}; cancelling {} outstanding queries", error, in_flight.len());
    gate.close();
    in_flight.abort_all();
    while in_flight.join_next().await.is_some() {}
    error
}
