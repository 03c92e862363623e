//! Error types for the vfs-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related errors
//! that can occur across the workspace.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use vfs_core::ConfigError;
///
/// let error = ConfigError::InvalidOption {
///     option: "interval_ms".to_owned(),
///     reason: "must be greater than zero".to_owned(),
/// };
/// assert!(error.to_string().contains("interval_ms"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// The configuration file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(Utf8PathBuf),

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}
