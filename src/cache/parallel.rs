use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::infrastructure::config::ParallelSettings;
use crate::infrastructure::error::{EngineError, Result};

/// A blocking unit of work run on the worker pool
pub type BlockingTask<R> = Box<dyn FnOnce() -> anyhow::Result<R> + Send + 'static>;

/// Named blocking tasks for one `execute_parallel` call. Names are unique.
pub struct TaskSet<R> {
    tasks: Vec<(String, BlockingTask<R>)>,
    names: HashSet<String>,
}

impl<R> TaskSet<R> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Add a task; a name already in the set is a configuration error
    pub fn insert<F>(&mut self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(EngineError::config(format!("duplicate task name: {}", name)));
        }
        self.tasks.push((name, Box::new(task)));
        Ok(())
    }

    pub fn with<F>(mut self, name: impl Into<String>, task: F) -> Result<Self>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        self.insert(name, task)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl<R> Default for TaskSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative counters for one processor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    /// Tasks that never ran because a sibling failed first
    pub cancelled_tasks: u64,
}

/// Runs named blocking tasks on a pool of at most `max_workers` threads
#[derive(Debug)]
pub struct ParallelProcessor {
    max_workers: usize,
    stats: Arc<RwLock<ParallelStats>>,
}

impl ParallelProcessor {
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(EngineError::config("max_workers must be positive"));
        }

        Ok(Self {
            max_workers,
            stats: Arc::new(RwLock::new(ParallelStats::default())),
        })
    }

    pub fn from_settings(settings: &ParallelSettings) -> Result<Self> {
        Self::new(settings.max_workers)
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Execute every task and return its result under its name.
    ///
    /// The first failing task stops all tasks that have not started yet; tasks already
    /// running are waited for and their results discarded, then the failure is returned.
    pub async fn execute_parallel<R>(&self, tasks: TaskSet<R>) -> Result<HashMap<String, R>>
    where
        R: Send + 'static,
    {
        if tasks.is_empty() {
            return Ok(HashMap::new());
        }

        let total = tasks.len();
        info!(
            "Starting parallel execution of {} tasks with {} workers",
            total, self.max_workers
        );

        let (names, units): (Vec<String>, Vec<BlockingTask<R>>) = tasks.tasks.into_iter().unzip();
        let labelled = names.iter().cloned().zip(units).collect();
        let outcome = run_pool(labelled, self.max_workers).await;

        {
            let mut stats = self.stats.write().await;
            stats.total_tasks += total as u64;
            stats.completed_tasks += outcome.completed as u64;
            stats.failed_tasks += outcome.failed as u64;
            stats.cancelled_tasks += outcome.cancelled as u64;
        }

        let values = outcome.into_result()?;
        let results: HashMap<String, R> = values
            .into_iter()
            .map(|(index, value)| (names[index].clone(), value))
            .collect();

        info!("Completed parallel execution of {} tasks", results.len());
        Ok(results)
    }

    pub async fn stats(&self) -> ParallelStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = ParallelStats::default();
    }
}

/// Ordered parallel map on a pool sized to the number of CPUs
pub async fn parallel_map<T, R, F>(f: F, items: Vec<T>) -> Result<Vec<R>>
where
    F: Fn(T) -> R + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    parallel_map_with(f, items, num_cpus::get()).await
}

pub async fn parallel_map_with<T, R, F>(f: F, items: Vec<T>, max_workers: usize) -> Result<Vec<R>>
where
    F: Fn(T) -> R + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    try_parallel_map(move |item| Ok(f(item)), items, max_workers).await
}

/// Ordered parallel map over a fallible function. Entry `i` of the output is `f(items[i])`.
pub async fn try_parallel_map<T, R, F>(f: F, items: Vec<T>, max_workers: usize) -> Result<Vec<R>>
where
    F: Fn(T) -> anyhow::Result<R> + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    if max_workers == 0 {
        return Err(EngineError::config("max_workers must be positive"));
    }
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let len = items.len();
    let f = Arc::new(f);
    let units: Vec<(String, BlockingTask<R>)> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let f = Arc::clone(&f);
            let task: BlockingTask<R> = Box::new(move || f(item));
            (format!("item[{}]", index), task)
        })
        .collect();

    let values = run_pool(units, max_workers).await.into_result()?;

    let mut slots: Vec<Option<R>> = (0..len).map(|_| None).collect();
    for (index, value) in values {
        slots[index] = Some(value);
    }

    slots
        .into_iter()
        .collect::<Option<Vec<R>>>()
        .ok_or_else(|| EngineError::task("parallel_map", anyhow::anyhow!("a result went missing")))
}

/// First failure wins; once set, units that have not started are skipped
struct FailFast {
    cancelled: AtomicBool,
    failure: Mutex<Option<EngineError>>,
}

impl FailFast {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn fail(&self, error: EngineError) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!("{}; cancelling remaining tasks", error);
            if let Ok(mut slot) = self.failure.lock() {
                *slot = Some(error);
            }
        }
    }

    fn take(&self) -> Option<EngineError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }
}

enum UnitOutcome<R> {
    Completed(usize, R),
    Failed,
    Skipped,
}

struct PoolOutcome<R> {
    values: Vec<(usize, R)>,
    completed: usize,
    failed: usize,
    cancelled: usize,
    failure: Option<EngineError>,
}

impl<R> PoolOutcome<R> {
    fn into_result(self) -> Result<Vec<(usize, R)>> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.values),
        }
    }
}

/// Run labelled units with at most `max_workers` executing at once.
/// Values come back tagged with their position in `units`.
async fn run_pool<R>(units: Vec<(String, BlockingTask<R>)>, max_workers: usize) -> PoolOutcome<R>
where
    R: Send + 'static,
{
    let started = Instant::now();
    let total = units.len();
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let state = Arc::new(FailFast::new());
    let mut join_set = JoinSet::new();
    let mut cancelled = 0;

    for (index, (name, task)) in units.into_iter().enumerate() {
        if state.is_cancelled() {
            cancelled += 1;
            continue;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                cancelled += 1;
                continue;
            }
        };

        let state = Arc::clone(&state);
        join_set.spawn_blocking(move || {
            let _permit = permit;
            if state.is_cancelled() {
                return UnitOutcome::Skipped;
            }

            debug!("Running task {}", name);
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(value)) => UnitOutcome::Completed(index, value),
                Ok(Err(cause)) => {
                    state.fail(EngineError::task(&name, cause));
                    UnitOutcome::Failed
                }
                Err(payload) => {
                    let cause = anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()));
                    state.fail(EngineError::task(&name, cause));
                    UnitOutcome::Failed
                }
            }
        });
    }

    let mut values = Vec::with_capacity(total);
    let mut failed = 0;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(UnitOutcome::Completed(index, value)) => values.push((index, value)),
            Ok(UnitOutcome::Failed) => failed += 1,
            Ok(UnitOutcome::Skipped) => cancelled += 1,
            Err(join_error) => {
                failed += 1;
                state.fail(EngineError::task(
                    "worker",
                    anyhow::anyhow!("worker thread failed: {}", join_error),
                ));
            }
        }
    }
    semaphore.close();

    let failure = state.take();
    let completed = values.len();
    debug!(
        "Pool finished in {:?}: {} completed, {} failed, {} cancelled",
        started.elapsed(),
        completed,
        failed,
        cancelled
    );

    PoolOutcome {
        values,
        completed,
        failed,
        cancelled,
        failure,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
