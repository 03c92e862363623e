//! Event types flowing through the monitor.
//!
//! # Event Flow
//!
//! ```text
//!  backend thread              application thread
//!        │                            │
//!   RawEvent ──► to_monitor_event     │ feed(MonitorEvent, path)
//!        │        (filters noise)     │
//!        ▼                            ▼
//!   NotificationTag::Backend    NotificationTag::Injected
//!        └──────────► coalescing queue ◄──┘
//!                           │
//!                           ▼  (after the quiescence interval)
//!                 callback(MonitorEvent)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of change delivered to a watch callback.
///
/// # Examples
///
/// ```
/// use vfs_monitor::MonitorEvent;
///
/// assert_eq!(MonitorEvent::Created.label(), "created");
/// assert_eq!(MonitorEvent::Deleted.to_string(), "deleted");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The contents or metadata of the path changed.
    Changed,
    /// The path was created.
    Created,
    /// The path was deleted.
    Deleted,
}

impl MonitorEvent {
    /// Returns a lowercase label for display and logging.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Created => "created",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Where a pending notification came from.
///
/// Ordering matters: a queued notification is only overwritten by one whose
/// tag is greater than or equal to its own, so an injected event can never be
/// replaced by a late backend echo of the same change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotificationTag {
    /// Reported by the change-detection backend.
    Backend,
    /// Synthesized by a caller through [`Monitor::feed`](crate::Monitor::feed).
    Injected,
}

/// A raw signal as reported by a backend, before filtering.
///
/// Only [`RawEvent::Changed`], [`RawEvent::Created`] and [`RawEvent::Deleted`]
/// ever reach the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEvent {
    /// Contents or metadata changed.
    Changed,
    /// A path appeared.
    Created,
    /// A path disappeared.
    Deleted,
    /// A rename whose endpoints could not be paired.
    Moved,
    /// The path was read or opened.
    Accessed,
    /// Anything else the backend could not classify, including any
    /// bookkeeping signals of its own.
    Other,
}

impl RawEvent {
    /// Translates the raw signal into a deliverable event, if it is one.
    ///
    /// # Examples
    ///
    /// ```
    /// use vfs_monitor::{MonitorEvent, RawEvent};
    ///
    /// assert_eq!(RawEvent::Created.to_monitor_event(), Some(MonitorEvent::Created));
    /// assert_eq!(RawEvent::Accessed.to_monitor_event(), None);
    /// ```
    #[must_use]
    pub const fn to_monitor_event(self) -> Option<MonitorEvent> {
        match self {
            Self::Changed => Some(MonitorEvent::Changed),
            Self::Created => Some(MonitorEvent::Created),
            Self::Deleted => Some(MonitorEvent::Deleted),
            Self::Moved | Self::Accessed | Self::Other => None,
        }
    }
}

/// Counters describing a monitor's activity.
///
/// Obtained from [`Monitor::stats`](crate::Monitor::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Number of registered watch handles.
    pub handles: usize,

    /// Number of notifications waiting for dispatch.
    pub pending: usize,

    /// Notifications that created a new queue entry.
    pub queued: u64,

    /// Notifications merged into an existing queue entry.
    pub coalesced: u64,

    /// Notifications dropped because a higher-precedence entry was queued.
    pub superseded: u64,

    /// Callbacks invoked.
    pub delivered: u64,

    /// Queue entries whose handle had been removed before dispatch.
    pub discarded: u64,

    /// Callbacks that panicked.
    pub panicked: u64,

    /// Whether backend-sourced notifications are still flowing.
    pub backend_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_precedence() {
        assert!(NotificationTag::Injected > NotificationTag::Backend);
        assert!(NotificationTag::Backend >= NotificationTag::Backend);
    }

    #[test]
    fn test_raw_event_filtering() {
        let delivered: Vec<_> = [
            RawEvent::Changed,
            RawEvent::Created,
            RawEvent::Deleted,
            RawEvent::Moved,
            RawEvent::Accessed,
            RawEvent::Other,
        ]
        .into_iter()
        .filter_map(RawEvent::to_monitor_event)
        .collect();

        assert_eq!(
            delivered,
            vec![
                MonitorEvent::Changed,
                MonitorEvent::Created,
                MonitorEvent::Deleted
            ]
        );
    }

    #[test]
    fn test_monitor_event_serialization() {
        assert_eq!(
            serde_json::to_string(&MonitorEvent::Changed).unwrap(),
            r#""changed""#
        );
        let parsed: MonitorEvent = serde_json::from_str(r#""deleted""#).unwrap();
        assert_eq!(parsed, MonitorEvent::Deleted);
    }

    #[test]
    fn test_stats_default() {
        let stats = MonitorStats::default();
        assert_eq!(stats.delivered, 0);
        assert!(!stats.backend_active);
    }
}
