//! Error types for the vfs-monitor crate.
//!
//! None of the public monitor operations return these errors. They travel
//! across the [`Backend`](crate::Backend) boundary, where the monitor turns
//! any fatal failure into a permanent downgrade to feed-only operation.

use std::path::Path;

use camino::Utf8PathBuf;

use crate::backend::SubscriptionToken;

/// Errors reported by a change-detection backend.
///
/// # Error Recovery Strategy
///
/// - **Missing path or watch** ([`BackendError::Notify`] with
///   [`notify::ErrorKind::PathNotFound`] or [`notify::ErrorKind::WatchNotFound`]):
///   Recoverable - only that watch goes without backend events
/// - **Other notify errors** ([`BackendError::Notify`]): Fatal - backend is disabled
/// - **Disconnected** ([`BackendError::Disconnected`]): Fatal - backend is disabled
/// - **Rejected** ([`BackendError::Rejected`]): Fatal - backend is disabled
/// - **Unknown token** ([`BackendError::UnknownToken`]): Fatal - backend is disabled
/// - **Non-UTF-8 path** ([`BackendError::NonUtf8Path`]): Recoverable - event is skipped
///
/// A path that vanished is routine: the kernel drops the watch on a deleted
/// file, so cancelling it afterwards reports `WatchNotFound`.
///
/// # Examples
///
/// ```
/// use vfs_monitor::BackendError;
///
/// let err = BackendError::Disconnected;
/// assert!(err.is_fatal());
/// assert!(err.to_string().contains("not connected"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The `notify` watcher failed to initialize or to (un)watch a path.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The backend is not connected, or its event channel is gone.
    #[error("backend is not connected")]
    Disconnected,

    /// The backend refused to watch a path.
    #[error("backend rejected {path}: {reason}")]
    Rejected {
        /// The path that could not be watched.
        path: Utf8PathBuf,
        /// Explanation from the backend.
        reason: String,
    },

    /// A subscription token the backend never issued, or already cancelled.
    #[error("unknown subscription token {0:?}")]
    UnknownToken(SubscriptionToken),

    /// A path reported by the backend is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),
}

impl BackendError {
    /// Creates a new [`BackendError::Rejected`] error.
    #[inline]
    pub fn rejected(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error only affects a single path or event.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Notify(err) => matches!(
                err.kind,
                notify::ErrorKind::PathNotFound | notify::ErrorKind::WatchNotFound
            ),
            Self::NonUtf8Path(_) => true,
            Self::Disconnected | Self::Rejected { .. } | Self::UnknownToken(_) => false,
        }
    }

    /// Returns `true` if this error should disable the backend.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Rejected { path, .. } => Some(path.as_std_path()),
            Self::Notify(err) => err.paths.first().map(std::path::PathBuf::as_path),
            Self::NonUtf8Path(path) => Some(path),
            Self::Disconnected | Self::UnknownToken(_) => None,
        }
    }
}
