use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the execution and memoization engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("task '{task}' failed: {source}")]
    TaskExecution {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("compression error: {message}")]
    Compression { message: String },

    #[error("cache unavailable during {operation}: {message}")]
    CacheUnavailable { operation: String, message: String },

    #[error("cannot build cache key: {message}")]
    KeyBuild { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
        }
    }

    pub fn task(task: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::TaskExecution {
            task: task.into(),
            source,
        }
    }

    pub fn compression(message: impl Into<String>) -> Self {
        EngineError::Compression {
            message: message.into(),
        }
    }

    pub fn cache_unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::CacheUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn key_build(message: impl Into<String>) -> Self {
        EngineError::KeyBuild {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        EngineError::Serialization {
            message: message.into(),
        }
    }

    /// Name of the failing unit for task execution errors
    pub fn task_name(&self) -> Option<&str> {
        match self {
            EngineError::TaskExecution { task, .. } => Some(task),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Configuration { .. } => ErrorCategory::Configuration,
            EngineError::TaskExecution { .. } => ErrorCategory::Execution,
            EngineError::Compression { .. } => ErrorCategory::Data,
            EngineError::CacheUnavailable { .. } => ErrorCategory::Infrastructure,
            EngineError::KeyBuild { .. } => ErrorCategory::Data,
            EngineError::Serialization { .. } => ErrorCategory::Data,
        }
    }

    /// Whether the memoizer can recover from this error by recomputing
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::CacheUnavailable { .. } | EngineError::Compression { .. }
        )
    }

    /// Short label used when reporting errors to a metrics sink
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "configuration",
            EngineError::TaskExecution { .. } => "task_execution",
            EngineError::Compression { .. } => "compression",
            EngineError::CacheUnavailable { .. } => "cache_unavailable",
            EngineError::KeyBuild { .. } => "key_build",
            EngineError::Serialization { .. } => "serialization",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Configuration,
    Execution,
    Data,
    Infrastructure,
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_keeps_name_and_cause() {
        let error = EngineError::task("item_3", anyhow::anyhow!("boom"));
        assert_eq!(error.task_name(), Some("item_3"));
        assert_eq!(error.category(), ErrorCategory::Execution);
        assert_eq!(error.to_string(), "task 'item_3' failed: boom");

        let source = std::error::Error::source(&error).expect("cause should be kept");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(EngineError::cache_unavailable("get", "connection refused").is_recoverable());
        assert!(EngineError::compression("bad gzip header").is_recoverable());
        assert!(!EngineError::config("max_workers must be positive").is_recoverable());
        assert_eq!(EngineError::key_build("x").kind(), "key_build");
    }
}
