//! The shared notification service.
//!
//! # Threads
//!
//! ```text
//!   application threads          backend thread (notify, manual, ...)
//!   add/remove/feed/wait                 │ BackendSink
//!          │                             ▼
//!          │                    ┌─────────────────┐
//!          │                    │ pump thread     │  RawEvent → MonitorEvent,
//!          │                    │ (blocking_recv) │  token → HandleId
//!          │                    └────────┬────────┘
//!          ▼                             ▼
//!   ┌─────────────────────────────────────────────┐
//!   │ Mutex<State>: registry, queue, dispatch,    │
//!   │               backend, counters             │
//!   └──────────────────────┬──────────────────────┘
//!                          │ wake (Condvar)
//!                          ▼
//!                 ┌─────────────────┐   callbacks run with
//!                 │ dispatch thread │   the lock released
//!                 └─────────────────┘
//! ```
//!
//! Every piece of mutable state sits behind one lock. The `drained` condvar is
//! only used by [`Monitor::wait`]; producers never block on the queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use vfs_core::{BackendKind, MonitorConfig, VfsPath};

use crate::backend::{Backend, BackendMessage, BackendSink, NotifyBackend, PumpMessage};
use crate::dispatch;
use crate::error::BackendError;
use crate::events::{MonitorEvent, MonitorStats, NotificationTag};
use crate::handle::{Callback, HandleId, WatchHandle, WatchKind};
use crate::queue::{Enqueued, NotificationQueue};
use crate::registry::{HandleEntry, HandleRegistry};

/// Distinguishes monitors so a handle cannot be removed from the wrong one.
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// The dispatch timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchState {
    /// No timer, empty queue.
    Idle,
    /// Timer armed; at least one notification pending.
    Scheduled { deadline: Instant },
    /// The dispatch thread is delivering a batch.
    Draining,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub queued: u64,
    pub coalesced: u64,
    pub superseded: u64,
    pub delivered: u64,
    pub discarded: u64,
    pub panicked: u64,
}

pub(crate) struct State {
    pub registry: HandleRegistry,
    pub queue: NotificationQueue,
    pub dispatch: DispatchState,
    pub backend: Option<Box<dyn Backend>>,
    pub counters: Counters,
    pub shutdown: bool,
}

impl State {
    /// Takes the backend out of service for good.
    ///
    /// The returned backend must be dropped after the lock is released.
    #[must_use]
    fn disable_backend(&mut self, reason: &dyn fmt::Display) -> Option<Box<dyn Backend>> {
        let backend = self.backend.take()?;
        self.registry.take_tokens();
        warn!(
            backend = backend.name(),
            reason = %reason,
            "Backend disabled, continuing with fed events only"
        );
        Some(backend)
    }

    /// Disables the backend if `err` is fatal, otherwise only logs it.
    #[must_use]
    fn backend_failed(&mut self, err: &BackendError) -> Option<Box<dyn Backend>> {
        if err.is_fatal() {
            return self.disable_backend(err);
        }
        debug!(error = %err, path = ?err.path(), "Backend error limited to one watch");
        None
    }
}

pub(crate) struct Shared {
    pub state: Mutex<State>,
    /// Wakes the dispatch thread when the timer is armed or on shutdown.
    pub wake: Condvar,
    /// Broadcast whenever the queue is drained and the timer disarmed.
    pub drained: Condvar,
    pub config: MonitorConfig,
    pub owner: u64,
    pub dispatch_thread: OnceLock<ThreadId>,
}

impl Shared {
    /// Queues a notification and arms the timer if it is idle.
    pub fn enqueue(
        &self,
        state: &mut State,
        id: HandleId,
        tag: NotificationTag,
        event: MonitorEvent,
        filename: Option<&str>,
    ) {
        let outcome = state.queue.enqueue(id, tag, event, filename);
        match outcome {
            Enqueued::Queued => state.counters.queued += 1,
            Enqueued::Coalesced => state.counters.coalesced += 1,
            Enqueued::Superseded => state.counters.superseded += 1,
        }
        trace!(handle = %id, ?tag, %event, filename, ?outcome, "Notification queued");

        if state.dispatch == DispatchState::Idle {
            state.dispatch = DispatchState::Scheduled {
                deadline: Instant::now() + self.config.interval(),
            };
            self.wake.notify_one();
        }
    }
}

pub(crate) struct MonitorInner {
    shared: Arc<Shared>,
    pump_tx: mpsc::UnboundedSender<PumpMessage>,
    dispatcher: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let (backend, entries) = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;

            let tokens = state.registry.take_tokens();
            let mut backend = state.backend.take();
            if let Some(backend) = backend.as_mut() {
                for token in &tokens {
                    if let Err(err) = backend.unsubscribe(token) {
                        debug!(error = %err, "Failed to cancel subscription during shutdown");
                    }
                }
            }

            state.queue.clear();
            state.dispatch = DispatchState::Idle;
            let entries = state.registry.clear();

            self.shared.wake.notify_all();
            self.shared.drained.notify_all();
            (backend, entries)
        };
        drop(entries);
        drop(backend);

        let _ = self.pump_tx.send(PumpMessage::Stop);
        let current = thread::current().id();
        for handle in [self.dispatcher.take(), self.pump.take()].into_iter().flatten() {
            // The last reference may be released on the dispatch thread itself.
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("Monitor thread panicked");
            }
        }
        info!("Monitor stopped");
    }
}

/// A shared filesystem change notification service.
///
/// Clients register watches with [`add_directory`](Self::add_directory) or
/// [`add_file`](Self::add_file). Changes reported by the backend, or fed with
/// [`feed`](Self::feed), are coalesced per watched target and delivered in
/// batches on a dedicated dispatch thread once the configured quiescence
/// interval has passed.
///
/// `Monitor` is a reference-counted handle: cloning acquires a reference and
/// dropping releases it. When the last reference goes away, backend
/// subscriptions are cancelled, pending notifications are dropped and the
/// service threads stop.
///
/// None of the operations report errors. A failing backend silently
/// downgrades the monitor to fed events only.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use vfs_core::{MonitorConfig, VfsPath};
/// use vfs_monitor::{Monitor, MonitorEvent};
///
/// let monitor = Monitor::feed_only(MonitorConfig::default());
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let log = Arc::clone(&seen);
/// let handle = monitor.add_directory(VfsPath::new("/srv/data"), move |_, _, event, _, changed| {
///     log.lock().push((event, changed.clone()));
/// });
///
/// monitor.feed(MonitorEvent::Created, &VfsPath::new("/srv/data/report.csv"));
/// monitor.wait();
///
/// assert_eq!(
///     seen.lock().as_slice(),
///     &[(MonitorEvent::Created, VfsPath::new("/srv/data/report.csv"))]
/// );
/// monitor.remove(handle);
/// ```
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared().state.lock();
        f.debug_struct("Monitor")
            .field("handles", &state.registry.len())
            .field("pending", &state.queue.len())
            .field("dispatch", &state.dispatch)
            .field("backend", &state.backend.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates a monitor with the backend selected by `config.backend`.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        match config.backend {
            BackendKind::Notify => Self::with_backend(config, NotifyBackend::new()),
            _ => Self::feed_only(config),
        }
    }

    /// Creates a monitor driven by `backend`.
    ///
    /// If the backend fails to connect, the monitor runs feed-only.
    #[must_use]
    pub fn with_backend<B: Backend>(config: MonitorConfig, backend: B) -> Self {
        Self::build(config, Some(Box::new(backend)))
    }

    /// Creates a monitor without a backend; only fed events are delivered.
    #[must_use]
    pub fn feed_only(config: MonitorConfig) -> Self {
        Self::build(config, None)
    }

    fn build(config: MonitorConfig, backend: Option<Box<dyn Backend>>) -> Self {
        let (pump_tx, pump_rx) = mpsc::unbounded_channel();

        let backend = backend.and_then(|mut backend| {
            match backend.connect(BackendSink::new(pump_tx.clone())) {
                Ok(()) => {
                    info!(backend = backend.name(), "Backend connected");
                    Some(backend)
                }
                Err(err) => {
                    warn!(
                        backend = backend.name(),
                        error = %err,
                        "Backend unavailable, continuing with fed events only"
                    );
                    None
                }
            }
        });
        let backend_active = backend.is_some();

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                registry: HandleRegistry::new(),
                queue: NotificationQueue::new(),
                dispatch: DispatchState::Idle,
                backend,
                counters: Counters::default(),
                shutdown: false,
            }),
            wake: Condvar::new(),
            drained: Condvar::new(),
            config,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            dispatch_thread: OnceLock::new(),
        });

        let pump = backend_active.then(|| {
            let shared = Arc::clone(&shared);
            spawn_thread("vfs-monitor-backend", move || run_pump(&shared, pump_rx))
        });

        let inner = Arc::new_cyclic(|weak: &Weak<MonitorInner>| {
            let dispatcher = {
                let shared = Arc::clone(&shared);
                let weak = Weak::clone(weak);
                spawn_thread("vfs-monitor-dispatch", move || dispatch::run(&shared, &weak))
            };
            MonitorInner {
                shared,
                pump_tx,
                dispatcher: Some(dispatcher),
                pump,
            }
        });

        info!(
            interval_ms = config.interval_ms,
            backend = backend_active,
            "Monitor started"
        );
        Self { inner }
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Watches a directory and its direct children.
    ///
    /// Changes to an entry of the directory are delivered with the entry's
    /// path as the changed path.
    pub fn add_directory<F>(&self, path: impl Into<VfsPath>, callback: F) -> WatchHandle
    where
        F: Fn(&Self, HandleId, MonitorEvent, &VfsPath, &VfsPath) + Send + Sync + 'static,
    {
        self.add(path.into(), WatchKind::Directory, Arc::new(callback))
    }

    /// Watches a single file.
    pub fn add_file<F>(&self, path: impl Into<VfsPath>, callback: F) -> WatchHandle
    where
        F: Fn(&Self, HandleId, MonitorEvent, &VfsPath, &VfsPath) + Send + Sync + 'static,
    {
        self.add(path.into(), WatchKind::File, Arc::new(callback))
    }

    fn add(&self, path: VfsPath, kind: WatchKind, callback: Callback) -> WatchHandle {
        let shared = self.shared();
        let mut state = shared.state.lock();
        let id = state.registry.next_id();

        let subscribed = state
            .backend
            .as_mut()
            .map(|backend| backend.subscribe(&path, kind));
        let mut retired = None;
        let token = match subscribed {
            Some(Ok(token)) => Some(token),
            Some(Err(err)) => {
                retired = state.backend_failed(&err);
                None
            }
            None => None,
        };

        let slot = state.registry.insert(HandleEntry {
            id,
            path: path.clone(),
            kind,
            callback,
            token,
        });
        drop(state);
        drop(retired);

        debug!(handle = %id, path = %path, ?kind, "Watch added");
        WatchHandle {
            id,
            slot,
            owner: shared.owner,
            path,
            kind,
        }
    }

    /// Removes a watch.
    ///
    /// Notifications already queued for the handle are discarded at dispatch
    /// time. Its callback is never invoked after this returns, unless it is
    /// already running on the dispatch thread.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was returned by a different monitor.
    #[allow(clippy::needless_pass_by_value)] // Consuming the handle prevents a second removal
    pub fn remove(&self, handle: WatchHandle) {
        let shared = self.shared();
        assert_eq!(
            handle.owner, shared.owner,
            "watch handle {} belongs to another monitor",
            handle.id
        );

        let mut state = shared.state.lock();
        let Some(entry) = state.registry.remove(handle.id, handle.slot) else {
            unreachable!("watch handle {} is not registered", handle.id);
        };

        let cancelled = entry
            .token
            .as_ref()
            .and_then(|token| state.backend.as_mut().map(|backend| backend.unsubscribe(token)));
        let retired = match cancelled {
            Some(Err(err)) => state.backend_failed(&err),
            _ => None,
        };
        drop(state);

        debug!(handle = %entry.id, path = %entry.path, "Watch removed");
        drop(entry);
        drop(retired);
    }

    /// Injects `event` on `path` as if the backend had reported it.
    ///
    /// Every watch on `path` receives the event. Unless `path` is a root,
    /// every directory watch on its parent also receives it, with `path` as
    /// the changed path. Fed events take precedence over backend events for
    /// the same target until they are delivered.
    pub fn feed(&self, event: MonitorEvent, path: &VfsPath) {
        let shared = self.shared();
        let mut state = shared.state.lock();

        let direct: SmallVec<[HandleId; 4]> =
            state.registry.watchers(path).map(|entry| entry.id).collect();
        for id in direct {
            shared.enqueue(&mut state, id, NotificationTag::Injected, event, None);
        }

        // Roots have no parent.
        if let Some((parent, name)) = path.parent().zip(path.name()) {
            let dirs: SmallVec<[HandleId; 4]> = state
                .registry
                .watchers(&parent)
                .filter(|entry| entry.kind == WatchKind::Directory)
                .map(|entry| entry.id)
                .collect();
            for id in dirs {
                shared.enqueue(&mut state, id, NotificationTag::Injected, event, Some(name));
            }
        }
    }

    /// Blocks until every pending notification has been delivered.
    ///
    /// Must not be called from a watch callback: the dispatch thread would
    /// wait for itself.
    ///
    /// # Panics
    ///
    /// Panics when called on the dispatch thread.
    pub fn wait(&self) {
        let shared = self.shared();
        assert!(
            shared.dispatch_thread.get() != Some(&thread::current().id()),
            "Monitor::wait called from the dispatch thread"
        );

        let mut state = shared.state.lock();
        while !state.shutdown && state.dispatch != DispatchState::Idle {
            shared.drained.wait_for(&mut state, shared.config.wait_poll());
        }
    }

    /// Returns a snapshot of the monitor's counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        let state = self.shared().state.lock();
        MonitorStats {
            handles: state.registry.len(),
            pending: state.queue.len(),
            queued: state.counters.queued,
            coalesced: state.counters.coalesced,
            superseded: state.counters.superseded,
            delivered: state.counters.delivered,
            discarded: state.counters.discarded,
            panicked: state.counters.panicked,
            backend_active: state.backend.is_some(),
        }
    }

    /// Returns `true` while backend notifications are still flowing.
    #[must_use]
    pub fn is_backend_active(&self) -> bool {
        self.shared().state.lock().backend.is_some()
    }

    /// Number of registered watches.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.shared().state.lock().registry.len()
    }

    /// Number of notifications waiting for dispatch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared().state.lock().queue.len()
    }

    /// Returns the configuration the monitor was created with.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.shared().config
    }

    /// Returns `true` if both values refer to the same monitor.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<MonitorInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) const fn from_inner(inner: Arc<MonitorInner>) -> Self {
        Self { inner }
    }
}

/// Translates backend messages into queue entries.
#[allow(clippy::needless_pass_by_value)] // Receiver is owned by the pump thread
fn run_pump(shared: &Shared, mut rx: mpsc::UnboundedReceiver<PumpMessage>) {
    while let Some(PumpMessage::Backend(message)) = rx.blocking_recv() {
        let mut state = shared.state.lock();
        if state.shutdown {
            break;
        }

        let retired = match message {
            BackendMessage::Event { token, event, name } => {
                // Late events from a disabled backend are ignored.
                let target = state
                    .backend
                    .as_ref()
                    .and_then(|_| event.to_monitor_event())
                    .zip(state.registry.id_for_token(&token));
                match target {
                    Some((event, id)) => {
                        shared.enqueue(&mut state, id, NotificationTag::Backend, event, name.as_deref());
                    }
                    None => trace!(?token, ?event, "Ignoring backend event"),
                }
                None
            }
            BackendMessage::Failed(reason) => state.disable_backend(&reason),
        };
        drop(state);
        drop(retired);
    }
    debug!("Backend pump stopped");
}

#[allow(clippy::expect_used)] // Thread creation only fails on resource exhaustion
fn spawn_thread<F>(name: &str, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .expect("failed to spawn monitor thread")
}
