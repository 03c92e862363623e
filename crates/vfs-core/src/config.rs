//! Configuration structures for the notification service.
//!
//! [`MonitorConfig`] implements [`Default`] with the reference timings and can
//! be loaded from a JSON file. Missing fields fall back to their defaults.

use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which change-detection backend the monitor should connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum BackendKind {
    /// The platform watcher provided by the `notify` crate.
    #[default]
    Notify,
    /// No backend; only fed events are delivered.
    None,
}

/// Configuration for the notification service.
///
/// # Examples
///
/// ```
/// use vfs_core::{BackendKind, MonitorConfig};
///
/// let config = MonitorConfig::default();
/// assert_eq!(config.interval_ms, 250);
/// assert_eq!(config.wait_poll_ms, 2000);
/// assert_eq!(config.backend, BackendKind::Notify);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Quiescence interval in milliseconds.
    ///
    /// The dispatch timer fires this long after the first notification is
    /// queued. No callback fires more often than once per interval per key.
    pub interval_ms: u64,

    /// Upper bound, in milliseconds, on a single sleep inside the drain barrier.
    pub wait_poll_ms: u64,

    /// Backend to connect at startup.
    pub backend: BackendKind,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 250,
            wait_poll_ms: 2000,
            backend: BackendKind::Notify,
        }
    }
}

impl MonitorConfig {
    /// Returns the quiescence interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the barrier poll bound as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Checks that every option holds a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] if a timing is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::invalid_option(
                "interval_ms",
                "must be greater than zero",
            ));
        }
        if self.wait_poll_ms == 0 {
            return Err(ConfigError::invalid_option(
                "wait_poll_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::InvalidOption`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, otherwise
    /// the errors of [`MonitorConfig::from_json_str`] or an I/O error.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_owned()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_monitor_config_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert_eq!(config.wait_poll(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let config = MonitorConfig::from_json_str(r#"{"interval_ms": 40}"#).unwrap();
        assert_eq!(config.interval_ms, 40);
        assert_eq!(config.wait_poll_ms, 2000);
        assert_eq!(config.backend, BackendKind::Notify);
    }

    #[test]
    fn test_config_rejects_zero_interval() {
        let err = MonitorConfig::from_json_str(r#"{"interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref option, .. } if option == "interval_ms"));
    }

    #[test]
    fn test_backend_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&BackendKind::Notify).unwrap(),
            r#""notify""#
        );
        assert_eq!(serde_json::to_string(&BackendKind::None).unwrap(), r#""none""#);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("monitor.json")).unwrap();
        std::fs::write(&path, r#"{"backend": "none", "wait_poll_ms": 100}"#).unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.backend, BackendKind::None);
        assert_eq!(config.wait_poll_ms, 100);
        assert_eq!(config.interval_ms, 250);
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = MonitorConfig::load(Utf8Path::new("/nonexistent/monitor.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
