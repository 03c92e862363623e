//! The dispatch thread.
//!
//! The thread sleeps until the timer is armed, waits out the quiescence
//! interval, then delivers one batch. A batch is exactly the notifications
//! pending when it starts; anything enqueued while callbacks run (including
//! by the callbacks themselves) goes to the next batch, one interval later.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};
use vfs_core::VfsPath;

use crate::monitor::{DispatchState, Monitor, MonitorInner, Shared, State};
use crate::queue::Notification;

pub(crate) fn run(shared: &Shared, monitor: &Weak<MonitorInner>) {
    let _ = shared.dispatch_thread.set(thread::current().id());

    let mut state = shared.state.lock();
    while !state.shutdown {
        match state.dispatch {
            DispatchState::Scheduled { deadline } if Instant::now() >= deadline => {
                drain(shared, &mut state, monitor);
            }
            DispatchState::Scheduled { deadline } => {
                shared.wake.wait_until(&mut state, deadline);
            }
            DispatchState::Idle | DispatchState::Draining => shared.wake.wait(&mut state),
        }
    }
    debug!("Dispatch thread stopped");
}

fn drain(shared: &Shared, state: &mut MutexGuard<'_, State>, monitor: &Weak<MonitorInner>) {
    let Some(inner) = monitor.upgrade() else {
        // Last reference is going away; teardown discards the queue.
        state.queue.clear();
        state.dispatch = DispatchState::Idle;
        shared.drained.notify_all();
        return;
    };
    let monitor = Monitor::from_inner(inner);
    state.dispatch = DispatchState::Draining;

    let batch = state.queue.len();
    let mut delivered = 0_u64;
    let mut discarded = 0_u64;

    for _ in 0..batch {
        let Some(Notification {
            id,
            tag,
            event,
            filename,
        }) = state.queue.pop()
        else {
            break;
        };

        // Removed handles leave their notifications behind.
        let Some(entry) = state.registry.get(id) else {
            trace!(handle = %id, "Dropping notification for removed watch");
            discarded += 1;
            continue;
        };
        let callback = Arc::clone(&entry.callback);
        let watched = entry.path.clone();
        let changed = resolve_path(&watched, filename.as_deref());

        trace!(handle = %id, ?tag, %event, path = %changed, "Delivering notification");
        let monitor = &monitor;
        let outcome = MutexGuard::unlocked(state, move || {
            panic::catch_unwind(AssertUnwindSafe(move || {
                callback(monitor, id, event, &watched, &changed);
            }))
        });

        match outcome {
            Ok(()) => delivered += 1,
            Err(_) => {
                warn!(handle = %id, %event, "Watch callback panicked");
                state.counters.panicked += 1;
            }
        }
    }

    state.counters.delivered += delivered;
    state.counters.discarded += discarded;

    if state.queue.is_empty() {
        state.dispatch = DispatchState::Idle;
        shared.drained.notify_all();
    } else {
        state.dispatch = DispatchState::Scheduled {
            deadline: Instant::now() + shared.config.interval(),
        };
    }
    debug!(batch, delivered, discarded, "Batch dispatched");

    // May be the last reference; teardown takes the lock.
    MutexGuard::unlocked(state, move || drop(monitor));
}

/// Resolves the path a notification is about.
///
/// No name means the watched path itself. A name that starts with a path
/// separator is taken as an absolute path; anything else is an entry of the
/// watched directory.
pub(crate) fn resolve_path(watched: &VfsPath, filename: Option<&str>) -> VfsPath {
    match filename {
        None => watched.clone(),
        Some(name) if name.starts_with(std::path::is_separator) => VfsPath::new(name),
        Some(name) => watched.relative(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_name_is_watched_path() {
        let watched = VfsPath::new("/srv/data");
        let resolved = resolve_path(&watched, None);
        assert_eq!(resolved, watched);
        assert_eq!(watched.ref_count(), 2);
    }

    #[test]
    fn test_resolve_relative_name() {
        let watched = VfsPath::new("/srv/data");
        assert_eq!(
            resolve_path(&watched, Some("report.csv")),
            VfsPath::new("/srv/data/report.csv")
        );
    }

    #[test]
    fn test_resolve_absolute_name() {
        let watched = VfsPath::new("/srv/data");
        assert_eq!(
            resolve_path(&watched, Some("/var/log/syslog")),
            VfsPath::new("/var/log/syslog")
        );
    }
}
