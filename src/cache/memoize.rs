use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::codec::PayloadCodec;
use crate::cache::gateway::{CacheLevel, CacheTiers};
use crate::cache::key::{CacheKeyBuilder, CallArgs};
use crate::infrastructure::config::CacheSettings;
use crate::infrastructure::error::{EngineError, Result};
use crate::infrastructure::metrics::MetricsSink;

const METRICS_METHOD: &str = "memoize";

/// Per-function memoization options
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// TTL passed to the store; `None` lets the store keep entries indefinitely
    pub expire: Option<Duration>,
    pub key_prefix: String,
    pub level: CacheLevel,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl CacheOptions {
    pub fn new(expire_secs: u64, key_prefix: impl Into<String>) -> Self {
        Self {
            expire: Some(Duration::from_secs(expire_secs)),
            key_prefix: key_prefix.into(),
            level: CacheLevel::default(),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            expire: Some(settings.default_ttl()),
            key_prefix: settings.key_prefix.clone(),
            level: CacheLevel::default(),
        }
    }

    pub fn with_level(mut self, level: CacheLevel) -> Self {
        self.level = level;
        self
    }
}

/// Read-through cache around an expensive computation.
///
/// On every call the arguments are turned into a key, the selected tiers are checked in
/// order and a hit is decoded and returned. On a miss the computation runs, its result is
/// encoded and written to every selected tier with the configured TTL. Store failures
/// never fail the call: a failed read counts as a miss and a failed write is only logged.
pub struct CacheFunction {
    tiers: CacheTiers,
    codec: PayloadCodec,
    key_builder: CacheKeyBuilder,
    options: CacheOptions,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CacheFunction {
    pub fn new(tiers: CacheTiers, options: CacheOptions) -> Self {
        Self {
            tiers,
            codec: PayloadCodec::default(),
            key_builder: CacheKeyBuilder::new(),
            options,
            metrics: None,
        }
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn key_for(&self, identity: &str, args: &CallArgs) -> Result<String> {
        self.key_builder.build(&self.options.key_prefix, identity, args)
    }

    /// Memoize an async computation
    pub async fn call<R, F, Fut>(&self, identity: &str, args: &CallArgs, compute: F) -> Result<R>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let started = Instant::now();
        let key = self.key_for(identity, args)?;
        let tiers = self.tiers.select(self.options.level);

        for (index, tier) in tiers.iter().enumerate() {
            let payload = match tier.get(&key).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(error) => {
                    self.report_unavailable(identity, "cache_get", &error);
                    continue;
                }
            };

            let backfill = (index > 0).then(|| payload.clone());
            if let Some(value) = self.decode_hit::<R>(identity, &key, payload) {
                if let Some(payload) = backfill {
                    for earlier in &tiers[..index] {
                        self.finish_write(identity, earlier.set(&key, payload.clone(), self.options.expire).await);
                    }
                }
                self.record(identity, "hit", started);
                return Ok(value);
            }
        }

        let value = match compute().await {
            Ok(value) => value,
            Err(cause) => return Err(self.compute_failed(identity, cause, started)),
        };

        if let Some(payload) = self.encode_for_store(identity, &value) {
            for tier in &tiers {
                self.finish_write(identity, tier.set(&key, payload.clone(), self.options.expire).await);
            }
        }

        self.record(identity, "miss", started);
        Ok(value)
    }

    /// Memoize a blocking computation through the gateways' synchronous mirrors
    pub fn call_blocking<R, F>(&self, identity: &str, args: &CallArgs, compute: F) -> Result<R>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> anyhow::Result<R>,
    {
        let started = Instant::now();
        let key = self.key_for(identity, args)?;
        let tiers = self.tiers.select(self.options.level);

        for (index, tier) in tiers.iter().enumerate() {
            let payload = match tier.get_sync(&key) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(error) => {
                    self.report_unavailable(identity, "cache_get", &error);
                    continue;
                }
            };

            let backfill = (index > 0).then(|| payload.clone());
            if let Some(value) = self.decode_hit::<R>(identity, &key, payload) {
                if let Some(payload) = backfill {
                    for earlier in &tiers[..index] {
                        self.finish_write(identity, earlier.set_sync(&key, payload.clone(), self.options.expire));
                    }
                }
                self.record(identity, "hit", started);
                return Ok(value);
            }
        }

        let value = match compute() {
            Ok(value) => value,
            Err(cause) => return Err(self.compute_failed(identity, cause, started)),
        };

        if let Some(payload) = self.encode_for_store(identity, &value) {
            for tier in &tiers {
                self.finish_write(identity, tier.set_sync(&key, payload.clone(), self.options.expire));
            }
        }

        self.record(identity, "miss", started);
        Ok(value)
    }

    /// Delete the entry for one call from every selected tier
    pub async fn invalidate(&self, identity: &str, args: &CallArgs) -> Result<bool> {
        let key = self.key_for(identity, args)?;
        let mut deleted = false;
        let mut last_error = None;

        for tier in self.tiers.select(self.options.level) {
            match tier.delete(&key).await {
                Ok(removed) => deleted |= removed,
                Err(error) => last_error = Some(error),
            }
        }

        match last_error {
            Some(error) if !deleted => Err(error),
            _ => Ok(deleted),
        }
    }

    /// Clear every selected tier
    pub async fn clear(&self) -> Result<bool> {
        let mut cleared = true;
        for tier in self.tiers.select(self.options.level) {
            cleared &= tier.clear().await?;
        }
        Ok(cleared)
    }

    fn decode_hit<R: DeserializeOwned>(&self, identity: &str, key: &str, payload: Value) -> Option<R> {
        match self.codec.decode_value(payload) {
            Ok(value) => {
                debug!("Cache hit for {} ({})", identity, key);
                Some(value)
            }
            Err(error) => {
                warn!("Discarding unreadable cache entry {}: {}", key, error);
                self.record_error(identity, error.kind());
                None
            }
        }
    }

    fn encode_for_store<R: Serialize>(&self, identity: &str, value: &R) -> Option<Value> {
        match self.codec.encode_value(value) {
            Ok((payload, compressed)) => {
                debug!("Storing result of {} (compressed: {})", identity, compressed);
                Some(payload)
            }
            Err(error) => {
                warn!("Result of {} cannot be cached: {}", identity, error);
                self.record_error(identity, error.kind());
                None
            }
        }
    }

    fn finish_write(&self, identity: &str, outcome: Result<bool>) {
        match outcome {
            Ok(true) => {}
            Ok(false) => warn!("Cache store refused the result of {}", identity),
            Err(error) => self.report_unavailable(identity, "cache_set", &error),
        }
    }

    fn report_unavailable(&self, identity: &str, operation: &str, error: &EngineError) {
        warn!("Cache unavailable for {} during {}: {}", identity, operation, error);
        self.record_error(identity, operation);
    }

    fn compute_failed(&self, identity: &str, cause: anyhow::Error, started: Instant) -> EngineError {
        self.record_error(identity, "compute");
        self.record(identity, "error", started);
        EngineError::task(identity, cause)
    }

    fn record(&self, identity: &str, status: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(METRICS_METHOD, identity, status, started.elapsed());
        }
    }

    fn record_error(&self, identity: &str, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(METRICS_METHOD, identity, kind);
        }
    }
}

/// A function bundled with the cache that memoizes it
pub struct Memoized<F> {
    name: String,
    func: F,
    cache: Arc<CacheFunction>,
}

/// Wrap `func` so calls with equal arguments are served from `cache`.
/// `name` is the function identity used in cache keys.
pub fn memoize<F>(name: impl Into<String>, func: F, cache: Arc<CacheFunction>) -> Memoized<F> {
    Memoized {
        name: name.into(),
        func,
        cache,
    }
}

impl<F> Memoized<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call an async function. `args` is the whole argument value and becomes a single
    /// key argument; bundle several parameters in a tuple.
    pub async fn call<A, Fut, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> Fut,
        A: Serialize,
        Fut: Future<Output = anyhow::Result<R>>,
        R: Serialize + DeserializeOwned,
    {
        let call_args = CallArgs::single(&args)?;
        self.cache.call(&self.name, &call_args, || (self.func)(args)).await
    }

    /// Call a blocking function
    pub fn call_blocking<A, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> anyhow::Result<R>,
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let call_args = CallArgs::single(&args)?;
        self.cache.call_blocking(&self.name, &call_args, || (self.func)(args))
    }

    pub async fn invalidate<A: Serialize>(&self, args: &A) -> Result<bool> {
        let call_args = CallArgs::single(args)?;
        self.cache.invalidate(&self.name, &call_args).await
    }

    pub fn key_for<A: Serialize>(&self, args: &A) -> Result<String> {
        let call_args = CallArgs::single(args)?;
        self.cache.key_for(&self.name, &call_args)
    }
}
