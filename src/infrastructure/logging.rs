use std::io;
use std::str::FromStr;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::infrastructure::config::LoggingSettings;
use crate::infrastructure::error::{EngineError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    pub include_file_location: bool,
    pub include_thread_names: bool,
    pub include_span_events: bool,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stdout,
            include_file_location: true,
            include_thread_names: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        let level = Level::from_str(&settings.level)
            .map_err(|_| EngineError::config(format!("unknown log level: {}", settings.level)))?;

        Ok(Self {
            level,
            format: settings.format.parse()?,
            output: settings.output.parse()?,
            include_file_location: settings.include_file_location,
            include_thread_names: settings.include_thread_names,
            include_span_events: settings.include_span_events,
            filter: settings.filter.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(EngineError::config(format!("unknown log format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a file
    File(String),
}

impl FromStr for LogOutput {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "" => Err(EngineError::config("log output must not be empty")),
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            path => Ok(LogOutput::File(path.to_string())),
        }
    }
}

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config)?;

    let fmt_layer = match &config.output {
        LogOutput::Stdout => create_fmt_layer(&config, io::stdout),
        LogOutput::Stderr => create_fmt_layer(&config, io::stderr),
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| EngineError::config(format!("cannot open log file {}: {}", path, e)))?;
            create_fmt_layer(&config, Mutex::new(file))
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| EngineError::config(format!("logging already initialized: {}", e)))
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Some(filter) = &config.filter {
        return EnvFilter::try_new(filter)
            .map_err(|e| EngineError::config(format!("invalid log filter '{}': {}", filter, e)));
    }

    let directive = format!("parallel_cache={}", config.level)
        .parse()
        .map_err(|e| EngineError::config(format!("invalid log directive: {}", e)))?;

    Ok(EnvFilter::from_default_env().add_directive(directive))
}

fn create_fmt_layer<W>(config: &LoggingConfig, make_writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let mut layer = fmt::layer()
        .with_writer(make_writer)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(config.include_thread_names)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_location)
        .with_line_number(config.include_file_location);

    if config.include_span_events {
        layer = layer.with_span_events(FmtSpan::CLOSE);
    }

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::Stdout);
        assert!(config.include_file_location);
        assert!(!config.include_thread_names);
    }

    #[test]
    fn test_logging_config_from_settings() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            format: "json".to_string(),
            output: "stderr".to_string(),
            filter: Some("parallel_cache::cache=trace".to_string()),
            include_file_location: false,
            include_thread_names: true,
            include_span_events: true,
        };

        let config = LoggingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter.as_deref(), Some("parallel_cache::cache=trace"));
        assert!(!config.include_file_location);
        assert!(config.include_thread_names);
        assert!(config.include_span_events);
    }

    #[test]
    fn test_log_output_parsing() {
        assert_eq!("stdout".parse::<LogOutput>().unwrap(), LogOutput::Stdout);
        assert_eq!(
            "/var/log/engine.log".parse::<LogOutput>().unwrap(),
            LogOutput::File("/var/log/engine.log".to_string())
        );
        assert!(" ".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_env_filter_directives() {
        let config = LoggingConfig {
            filter: Some("parallel_cache=debug,tokio=warn".to_string()),
            ..Default::default()
        };
        assert!(build_env_filter(&config).is_ok());

        let broken = LoggingConfig {
            filter: Some("parallel_cache=notalevel".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_env_filter(&broken),
            Err(EngineError::Configuration { .. })
        ));
    }

    #[test]
    fn test_setup_logging_to_file_installs_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.log");
        let config = LoggingConfig {
            format: LogFormat::Json,
            output: LogOutput::File(path.to_string_lossy().into_owned()),
            include_span_events: true,
            ..Default::default()
        };

        setup_logging(config.clone()).unwrap();
        tracing::info!("written to the log file");
        assert!(path.exists());

        assert!(setup_logging(config).is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
    }
}
