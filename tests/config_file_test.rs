use parallel_cache::cache::{CacheOptions, DataBatcher, PayloadCodec};
use parallel_cache::infrastructure::config::{ConfigManager, ConfigSource, EngineConfig};
use parallel_cache::infrastructure::EngineError;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn no_env(_name: &str) -> Option<String> {
    None
}

#[test]
fn test_toml_file_overrides_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        r#"
[parallel]
max_workers = 3

[batch]
batch_size = 25

[cache]
default_ttl_secs = 120
key_prefix = "reports"
"#,
    )?;

    let mut manager = ConfigManager::new().add_source(ConfigSource::File(path));
    let config = manager.load_with_env(no_env)?.clone();

    assert_eq!(config.parallel.max_workers, 3);
    assert_eq!(config.batch.batch_size, 25);
    assert_eq!(config.batch.concurrency, 1);
    assert_eq!(config.query.concurrency_limit, 10);
    assert_eq!(config.cache.key_prefix, "reports");

    let options = CacheOptions::from_settings(&config.cache);
    assert_eq!(options.expire, Some(Duration::from_secs(120)));
    assert_eq!(DataBatcher::from_settings(&config.batch)?.batch_size(), 25);
    assert_eq!(PayloadCodec::from_settings(&config.cache).threshold(), 1024);

    Ok(())
}

#[test]
fn test_yaml_and_json_files() -> anyhow::Result<()> {
    let dir = TempDir::new()?;

    let yaml = dir.path().join("engine.yaml");
    fs::write(&yaml, "query:\n  concurrency_limit: 4\ncache:\n  compression_threshold: 64\n")?;
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(yaml));
    let config = manager.load_with_env(no_env)?;
    assert_eq!(config.query.concurrency_limit, 4);
    assert_eq!(config.cache.compression_threshold, 64);

    let json = dir.path().join("engine.json");
    fs::write(&json, r#"{"logging": {"level": "debug", "format": "json"}}"#)?;
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(json));
    let config = manager.load_with_env(no_env)?;
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");

    Ok(())
}

#[test]
fn test_environment_and_overrides_layer_on_top() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("engine.toml");
    fs::write(&path, "[batch]\nbatch_size = 5\n")?;

    let env: HashMap<&str, &str> = HashMap::from([
        ("PARALLEL_CACHE_BATCH_SIZE", "8"),
        ("PARALLEL_CACHE_MAX_WORKERS", "2"),
    ]);
    let overrides = HashMap::from([("max-workers".to_string(), "6".to_string())]);

    let mut manager = ConfigManager::new()
        .add_source(ConfigSource::File(path))
        .add_source(ConfigSource::Environment)
        .add_source(ConfigSource::Overrides(overrides));
    let config = manager.load_with_env(|name| env.get(name).map(|value| value.to_string()))?;

    assert_eq!(config.batch.batch_size, 8);
    assert_eq!(config.parallel.max_workers, 6);

    Ok(())
}

#[test]
fn test_later_files_only_replace_keys_they_set() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let base = dir.path().join("base.toml");
    fs::write(&base, "[parallel]\nmax_workers = 3\n\n[batch]\nbatch_size = 5\n")?;
    let local = dir.path().join("local.yaml");
    fs::write(&local, "batch:\n  batch_size: 7\n")?;

    let env: HashMap<&str, &str> = HashMap::from([("PARALLEL_CACHE_CACHE_KEY_PREFIX", "from-env")]);
    let late = dir.path().join("late.json");
    fs::write(&late, r#"{"query": {"concurrency_limit": 2}}"#)?;

    let mut manager = ConfigManager::new()
        .add_source(ConfigSource::File(base))
        .add_source(ConfigSource::File(local))
        .add_source(ConfigSource::Environment)
        .add_source(ConfigSource::File(late));
    let config = manager.load_with_env(|name| env.get(name).map(|value| value.to_string()))?;

    assert_eq!(config.parallel.max_workers, 3);
    assert_eq!(config.batch.batch_size, 7);
    assert_eq!(config.cache.key_prefix, "from-env");
    assert_eq!(config.query.concurrency_limit, 2);

    Ok(())
}

#[test]
fn test_logging_output_and_filter_from_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        "[logging]\noutput = \"stderr\"\nfilter = \"parallel_cache=trace\"\ninclude_span_events = true\n",
    )?;

    let mut manager = ConfigManager::new().add_source(ConfigSource::File(path));
    let config = manager.load_with_env(no_env)?;
    assert_eq!(config.logging.output, "stderr");
    assert_eq!(config.logging.filter.as_deref(), Some("parallel_cache=trace"));
    assert!(config.logging.include_span_events);
    assert_eq!(config.logging.level, "info");

    Ok(())
}

#[test]
fn test_invalid_configurations_are_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;

    let zero = dir.path().join("zero.toml");
    fs::write(&zero, "[query]\nconcurrency_limit = 0\n")?;
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(zero));
    assert!(matches!(
        manager.load_with_env(no_env),
        Err(EngineError::Configuration { .. })
    ));

    let unknown = dir.path().join("engine.ini");
    fs::write(&unknown, "max_workers=2")?;
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(unknown));
    assert!(manager.load_with_env(no_env).is_err());

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "[parallel\nmax_workers = ")?;
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(broken));
    assert!(manager.load_with_env(no_env).is_err());

    // missing files are skipped
    let mut manager = ConfigManager::new().add_source(ConfigSource::File(dir.path().join("absent.toml")));
    assert_eq!(manager.load_with_env(no_env)?, &EngineConfig::default());

    Ok(())
}

#[test]
fn test_save_and_reload() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("saved.yaml");

    let overrides = HashMap::from([("cache-key-prefix".to_string(), "saved".to_string())]);
    let mut manager = ConfigManager::new().add_source(ConfigSource::Overrides(overrides));
    manager.load_with_env(no_env)?;
    manager.save_to_file(&path)?;

    let mut reloaded = ConfigManager::new().add_source(ConfigSource::File(path));
    let config = reloaded.load_with_env(no_env)?;
    assert_eq!(config.cache.key_prefix, "saved");
    assert_eq!(config, manager.get_config());

    Ok(())
}
