use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infrastructure::error::{EngineError, Result};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "PARALLEL_CACHE_";

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallel: ParallelSettings,
    pub batch: BatchSettings,
    pub query: QuerySettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub max_workers: usize,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub batch_size: usize,
    /// Batches handled at once; 1 keeps batches strictly sequential
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub concurrency_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    pub key_prefix: String,
    /// Serialized size in bytes above which payloads are compressed
    pub compression_threshold: usize,
    pub compression_level: u32,
    /// Entry capacity of the in-process gateway
    pub memory_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            key_prefix: "cache".to_string(),
            compression_threshold: 1024,
            compression_level: 6,
            memory_capacity: 1000,
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
    /// `stdout`, `stderr` or a file path to append to
    pub output: String,
    /// Full `EnvFilter` directive; replaces the level-based default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub include_file_location: bool,
    pub include_thread_names: bool,
    pub include_span_events: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            filter: None,
            include_file_location: true,
            include_thread_names: false,
            include_span_events: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parallel.max_workers == 0 {
            return Err(EngineError::config("parallel.max_workers must be positive"));
        }
        if self.batch.batch_size == 0 {
            return Err(EngineError::config("batch.batch_size must be positive"));
        }
        if self.batch.concurrency == 0 {
            return Err(EngineError::config("batch.concurrency must be positive"));
        }
        if self.query.concurrency_limit == 0 {
            return Err(EngineError::config("query.concurrency_limit must be positive"));
        }
        if self.cache.memory_capacity == 0 {
            return Err(EngineError::config("cache.memory_capacity must be positive"));
        }
        if self.cache.compression_level > 9 {
            return Err(EngineError::config(format!(
                "cache.compression_level must be between 0 and 9, got {}",
                self.cache.compression_level
            )));
        }
        Ok(())
    }

    /// Apply one named setting. Names use the override form, e.g. `max-workers`.
    pub fn apply_setting(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "max-workers" => self.parallel.max_workers = parse_number(name, value)?,
            "batch-size" => self.batch.batch_size = parse_number(name, value)?,
            "batch-concurrency" => self.batch.concurrency = parse_number(name, value)?,
            "query-concurrency-limit" => self.query.concurrency_limit = parse_number(name, value)?,
            "cache-ttl-secs" => self.cache.default_ttl_secs = parse_number(name, value)?,
            "cache-key-prefix" => self.cache.key_prefix = value.to_string(),
            "compression-threshold" => self.cache.compression_threshold = parse_number(name, value)?,
            "compression-level" => self.cache.compression_level = parse_number(name, value)?,
            "memory-capacity" => self.cache.memory_capacity = parse_number(name, value)?,
            "log-level" => self.logging.level = value.to_string(),
            "log-format" => self.logging.format = value.to_string(),
            "log-output" => self.logging.output = value.to_string(),
            "log-filter" => self.logging.filter = Some(value.to_string()),
            _ => return Err(EngineError::config(format!("unknown setting: {}", name))),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::config(format!("invalid value for {}: '{}'", name, value)))
}

/// Settings that can be overridden from the environment
const ENV_SETTINGS: &[&str] = &[
    "max-workers",
    "batch-size",
    "batch-concurrency",
    "query-concurrency-limit",
    "cache-ttl-secs",
    "cache-key-prefix",
    "compression-threshold",
    "compression-level",
    "memory-capacity",
    "log-level",
    "log-format",
    "log-output",
    "log-filter",
];

fn merge_values(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, serde_json::Value::Null) => {}
        (base, layer) => *base = layer,
    }
}

/// `max-workers` -> `PARALLEL_CACHE_MAX_WORKERS`
pub fn env_var_name(setting: &str) -> String {
    format!("{}{}", ENV_PREFIX, setting.replace('-', "_").to_ascii_uppercase())
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
    Overrides(HashMap<String, String>),
    Default,
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(EngineError::config(format!(
                "unsupported config file format: {}",
                path.display()
            ))),
        }
    }
}

/// Layers configuration sources in the order they were added
pub struct ConfigManager {
    config: EngineConfig,
    config_sources: Vec<ConfigSource>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            config_sources: vec![ConfigSource::Default],
        }
    }

    pub fn add_source(mut self, source: ConfigSource) -> Self {
        self.config_sources.push(source);
        self
    }

    pub fn load(&mut self) -> Result<&EngineConfig> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Same as `load`, with environment lookups served by `lookup`
    pub fn load_with_env<F>(&mut self, lookup: F) -> Result<&EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        for source in &self.config_sources {
            match source {
                ConfigSource::File(path) => {
                    if let Some(layer) = Self::load_from_file(path)? {
                        config = Self::apply_layer(&config, layer, path)?;
                    }
                }
                ConfigSource::Environment => {
                    dotenvy::dotenv().ok();
                    Self::load_from_environment(&mut config, &lookup)?;
                }
                ConfigSource::Overrides(settings) => {
                    for (name, value) in settings {
                        config.apply_setting(name, value)?;
                    }
                }
                ConfigSource::Default => {}
            }
        }

        config.validate()?;
        self.config = config;
        Ok(&self.config)
    }

    /// Parse a config file into an untyped layer. Missing files are skipped.
    fn load_from_file(path: &Path) -> Result<Option<serde_json::Value>> {
        if !path.exists() {
            return Ok(None);
        }

        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;

        let layer = match format {
            ConfigFormat::Toml => toml::from_str(&content)
                .map_err(|e| EngineError::config(format!("TOML parse error: {}", e)))?,
            ConfigFormat::Yaml => serde_yaml::from_str(&content)
                .map_err(|e| EngineError::config(format!("YAML parse error: {}", e)))?,
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| EngineError::config(format!("JSON parse error: {}", e)))?,
        };

        Ok(Some(layer))
    }

    /// Only the keys a file sets replace the running values
    fn apply_layer(config: &EngineConfig, layer: serde_json::Value, path: &Path) -> Result<EngineConfig> {
        let mut merged = serde_json::to_value(config)?;
        merge_values(&mut merged, layer);
        serde_json::from_value(merged).map_err(|e| {
            EngineError::config(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    fn load_from_environment<F>(config: &mut EngineConfig, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for setting in ENV_SETTINGS {
            if let Some(value) = lookup(&env_var_name(setting)) {
                config.apply_setting(setting, &value)?;
            }
        }
        Ok(())
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(&self.config)
                .map_err(|e| EngineError::config(format!("TOML serialization error: {}", e)))?,
            ConfigFormat::Yaml => serde_yaml::to_string(&self.config)
                .map_err(|e| EngineError::config(format!("YAML serialization error: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(&self.config)
                .map_err(|e| EngineError::config(format!("JSON serialization error: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| {
            EngineError::config(format!("cannot write config file {}: {}", path.display(), e))
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
