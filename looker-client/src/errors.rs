//! Error types for the Looker engine.

use looker_cache::CacheError;
use looker_worker::WorkerError;
use std::io;
use thiserror::Error;

/// Errors that can occur while configuring or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration document is not valid TOML for the engine.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An execution context failed.
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// An instance cache query failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl EngineError {
    /// Returns true if this error is potentially retryable.
    ///
    /// Backend failures inside a worker are transient; a later request may
    /// succeed. Configuration problems and dead contexts are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Worker(e) => e.is_backend(),
            Self::Cache(CacheError::LoadAbandoned(_)) => true,
            _ => false,
        }
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

/// Failure of a label painting job, delivered to every waiter of the job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelRenderError {
    /// The worker failed while painting the sample.
    #[error("Label painting failed: {0}")]
    Worker(#[from] WorkerError),

    /// The manager was dropped before the job completed.
    #[error("Label rendering manager shut down before the job completed")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        assert!(EngineError::Worker(WorkerError::Fetch("timeout".to_string())).is_retryable());
        assert!(EngineError::Cache(CacheError::LoadAbandoned("k".to_string())).is_retryable());

        assert!(EngineError::Worker(WorkerError::Terminated).is_fatal());
        assert!(EngineError::Config("bad".to_string()).is_fatal());
        assert!(EngineError::Cache(CacheError::UnknownKey("k".to_string())).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::Config("chunk_size cannot be 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: chunk_size cannot be 0");

        let err = LabelRenderError::from(WorkerError::Paint("bad mask".to_string()));
        assert!(err.to_string().contains("bad mask"));
    }
}
