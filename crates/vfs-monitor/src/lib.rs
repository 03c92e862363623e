//! Shared filesystem change notification service.
//!
//! This crate lets many clients inside one process watch files and
//! directories through a single [`Monitor`]. Change events, whether reported
//! by a backend or injected with [`Monitor::feed`], are coalesced per watched
//! target and delivered in batches on a dedicated dispatch thread.
//!
//! # Overview
//!
//! - One pending notification per `(handle, filename)` target; a burst of
//!   changes collapses into a single callback
//! - Fed events take precedence over backend events for the same target
//! - Dispatch happens after a quiescence interval (250ms by default)
//! - Callbacks run with no lock held and may re-enter the monitor
//! - [`Monitor::wait`] blocks until everything pending has been delivered
//! - Backend failures downgrade the monitor to fed events only; no operation
//!   ever reports an error
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  subscribe/unsubscribe   ┌──────────────────────────┐
//! │   Monitor    │ ───────────────────────► │ Backend (notify, manual) │
//! │  add/remove  │                          └────────────┬─────────────┘
//! │  feed/wait   │                                       │ BackendSink
//! └──────┬───────┘                                       ▼
//!        │ enqueue(Injected)                      ┌─────────────┐
//!        ▼                                        │ pump thread │
//! ┌────────────────────────────────┐  enqueue     └──────┬──────┘
//! │ NotificationQueue (coalescing) │ ◄─────(Backend)─────┘
//! └──────────────┬─────────────────┘
//!                │ timer (interval)
//!                ▼
//!        ┌────────────────┐   callback(monitor, id, event, watched, changed)
//!        │ dispatch thread│ ─────────────────────────────────────────────►
//!        └────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! vfs-cli ──► vfs-monitor ──► vfs-core
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use vfs_core::{BackendKind, MonitorConfig, VfsPath};
//! use vfs_monitor::{Monitor, MonitorEvent};
//!
//! let config = MonitorConfig { backend: BackendKind::None, ..MonitorConfig::default() };
//! let monitor = Monitor::new(config);
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&count);
//! let handle = monitor.add_file(VfsPath::new("/etc/hosts"), move |_, _, event, _, _| {
//!     assert_eq!(event, MonitorEvent::Changed);
//!     seen.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! for _ in 0..10 {
//!     monitor.feed(MonitorEvent::Changed, &VfsPath::new("/etc/hosts"));
//! }
//! monitor.wait();
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//!
//! monitor.remove(handle);
//! ```
//!
//! # Error Handling
//!
//! The public operations are infallible. [`BackendError`] is what backends
//! return to the monitor; it is logged and then disables the backend.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod backend;
mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
mod monitor;
mod queue;
mod registry;
mod shared;

// Re-export backend types
pub use backend::{
    Backend, BackendMessage, BackendSink, ManualBackend, NotifyBackend, SubscriptionToken,
};

// Re-export error types
pub use error::BackendError;

// Re-export event types
pub use events::{MonitorEvent, MonitorStats, NotificationTag, RawEvent};

// Re-export handle types
pub use handle::{Callback, HandleId, WatchHandle, WatchKind};

// Re-export the service
pub use monitor::Monitor;
pub use shared::SharedMonitor;
