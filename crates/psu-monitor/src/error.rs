//! Error types for the monitor.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring or running the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be read or written.
    #[error("Configuration file {}: {source}", .path.display())]
    ConfigIo {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`crate::MonitorConfig`].
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The registry does not match the configured PSU population.
    #[error("Registry holds {registered} PSUs but {configured} are configured")]
    RegistryMismatch {
        /// `psu_count` from the configuration.
        configured: u8,
        /// Entries in the registry.
        registered: usize,
    },

    /// The monitor thread could not be started.
    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The monitor loop panicked and stopped.
    #[error("Monitor loop panicked")]
    LoopPanicked,
}

impl MonitorError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// True for errors the operator fixes by editing configuration.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::ConfigParse(_) | Self::RegistryMismatch { .. }
        )
    }
}

/// Result alias for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
