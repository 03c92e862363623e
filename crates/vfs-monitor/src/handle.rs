//! Watch handles and callback types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vfs_core::VfsPath;

use crate::events::MonitorEvent;
use crate::monitor::Monitor;

/// Identifier of a watch registration.
///
/// Ids are allocated from a per-monitor counter starting at 1 and are never
/// reused, even after the handle is removed. A queued notification that names
/// a removed id is therefore always recognizable as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl HandleId {
    /// Returns the inner u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a watch targets a single file or a directory and its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    /// Only the path itself is watched.
    File,
    /// The path and its direct children are watched.
    Directory,
}

/// Function invoked on the dispatch thread for every delivered notification.
///
/// Arguments are the monitor, the handle id, the event, the watched path and
/// the changed path. Any per-watch user data is captured by the closure. The
/// monitor lock is not held during the call, so the callback may register,
/// remove or feed; it must not call [`Monitor::wait`].
pub type Callback = Arc<dyn Fn(&Monitor, HandleId, MonitorEvent, &VfsPath, &VfsPath) + Send + Sync>;

/// A live watch registration.
///
/// Returned by [`Monitor::add_directory`] and [`Monitor::add_file`] and
/// consumed by [`Monitor::remove`]. Dropping a handle without removing it
/// keeps the watch active for the lifetime of the monitor.
#[must_use = "a watch handle must be passed to Monitor::remove to stop watching"]
pub struct WatchHandle {
    pub(crate) id: HandleId,
    pub(crate) slot: usize,
    pub(crate) owner: u64,
    pub(crate) path: VfsPath,
    pub(crate) kind: WatchKind,
}

impl WatchHandle {
    /// Returns the handle's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Returns the watched path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    /// Returns the watch kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> WatchKind {
        self.kind
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_id_display_and_order() {
        assert_eq!(HandleId(3).to_string(), "#3");
        assert!(HandleId(2) < HandleId(10));
        assert_eq!(HandleId(5).as_u64(), 5);
    }

    #[test]
    fn test_watch_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&WatchKind::Directory).unwrap(),
            r#""directory""#
        );
    }
}
