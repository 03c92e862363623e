//! A backend driven by hand.
//!
//! [`ManualBackend`] keeps the same routing rules as [`NotifyBackend`]
//! (exact path, plus directory parent) but produces events only when told to.
//! It is cheap to clone; every clone drives the same backend, so a test can
//! keep one clone while the monitor owns another.
//!
//! [`NotifyBackend`]: super::NotifyBackend

use std::sync::Arc;

use camino::Utf8PathBuf;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use vfs_core::VfsPath;

use super::{Backend, BackendSink, RouteTable, SubscriptionToken};
use crate::error::BackendError;
use crate::events::RawEvent;
use crate::handle::WatchKind;

#[derive(Debug, Default)]
struct ManualState {
    sink: Option<BackendSink>,
    routes: RouteTable,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    vanished: FxHashSet<Utf8PathBuf>,
}

/// A scriptable [`Backend`] for tests and embedders that produce their own
/// change events.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use vfs_core::{MonitorConfig, VfsPath};
/// use vfs_monitor::{ManualBackend, Monitor, RawEvent};
///
/// let backend = ManualBackend::new();
/// let monitor = Monitor::with_backend(MonitorConfig::default(), backend.clone());
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&hits);
/// let handle = monitor.add_file(VfsPath::new("/etc/hosts"), move |_, _, _, _, _| {
///     seen.fetch_add(1, Ordering::SeqCst);
/// });
///
/// backend.emit(&VfsPath::new("/etc/hosts"), RawEvent::Changed);
/// backend.emit(&VfsPath::new("/etc/hosts"), RawEvent::Changed);
///
/// // Backend events reach the queue through the pump thread.
/// while monitor.stats().queued == 0 {
///     std::thread::sleep(std::time::Duration::from_millis(1));
/// }
/// monitor.wait();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// # monitor.remove(handle);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualBackend {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualBackend {
    /// Creates a backend that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`Backend::connect`] fail, as if the transport could not open.
    #[must_use]
    pub fn failing_connect(self) -> Self {
        self.inner.lock().fail_connect = true;
        self
    }

    /// Makes subsequent subscriptions fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.inner.lock().fail_subscribe = fail;
    }

    /// Makes subsequent unsubscriptions fail.
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.inner.lock().fail_unsubscribe = fail;
    }

    /// Acts as if `path` was deleted behind the backend's back.
    ///
    /// Like a platform watcher, the backend then forgets the path: new
    /// subscriptions to it fail with a missing path, and cancelling an
    /// existing one reports a missing watch.
    pub fn vanish(&self, path: &VfsPath) {
        self.inner.lock().vanished.insert(path.as_path().to_owned());
    }

    /// Returns `true` once a monitor connected and is still listening.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().sink.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Reports `event` on `path` to every subscription covering it.
    ///
    /// Returns how many events were sent.
    pub fn emit(&self, path: &VfsPath, event: RawEvent) -> usize {
        let state = self.inner.lock();
        let Some(sink) = &state.sink else {
            return 0;
        };
        state
            .routes
            .matches(path.as_path())
            .into_iter()
            .filter(|(token, name)| {
                sink.event(SubscriptionToken::Manual(*token), event, name.clone())
                    .is_ok()
            })
            .count()
    }

    /// Sends a raw event for an explicit token, bypassing routing.
    ///
    /// Returns `false` if no monitor is listening.
    pub fn emit_token(&self, token: &SubscriptionToken, event: RawEvent, name: Option<&str>) -> bool {
        let state = self.inner.lock();
        state.sink.as_ref().is_some_and(|sink| {
            sink.event(token.clone(), event, name.map(str::to_owned))
                .is_ok()
        })
    }

    /// Reports a transport failure to the monitor.
    ///
    /// Returns `false` if no monitor is listening.
    pub fn fail_transport(&self, reason: &str) -> bool {
        let state = self.inner.lock();
        state
            .sink
            .as_ref()
            .is_some_and(|sink| sink.fail(reason).is_ok())
    }
}

impl Backend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn connect(&mut self, sink: BackendSink) -> Result<(), BackendError> {
        let mut state = self.inner.lock();
        if state.fail_connect {
            return Err(BackendError::Disconnected);
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn subscribe(
        &mut self,
        path: &VfsPath,
        kind: WatchKind,
    ) -> Result<SubscriptionToken, BackendError> {
        let mut state = self.inner.lock();
        if state.sink.is_none() {
            return Err(BackendError::Disconnected);
        }
        if state.fail_subscribe {
            return Err(BackendError::rejected(path.as_path(), "subscription refused"));
        }
        if state.vanished.contains(path.as_path()) {
            let err = notify::Error::path_not_found().add_path(path.as_std_path().to_path_buf());
            return Err(err.into());
        }
        let (token, _) = state.routes.insert(path.as_path(), kind);
        Ok(SubscriptionToken::Manual(token))
    }

    fn unsubscribe(&mut self, token: &SubscriptionToken) -> Result<(), BackendError> {
        let mut state = self.inner.lock();
        if state.fail_unsubscribe {
            return Err(BackendError::Disconnected);
        }
        let SubscriptionToken::Manual(number) = token else {
            return Err(BackendError::UnknownToken(token.clone()));
        };
        let (path, _) = state
            .routes
            .remove(*number)
            .ok_or_else(|| BackendError::UnknownToken(token.clone()))?;
        if state.vanished.contains(&path) {
            let err = notify::Error::watch_not_found().add_path(path.into_std_path_buf());
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendMessage, PumpMessage};
    use tokio::sync::mpsc;

    #[test]
    fn test_emit_without_connection_sends_nothing() {
        let backend = ManualBackend::new();
        assert_eq!(backend.emit(&VfsPath::new("/a"), RawEvent::Changed), 0);
        assert!(!backend.fail_transport("boom"));
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_emit_routes_like_a_directory_watch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = ManualBackend::new();
        backend.connect(BackendSink::new(tx)).unwrap();
        let dir = backend
            .subscribe(&VfsPath::new("/srv"), WatchKind::Directory)
            .unwrap();

        assert_eq!(backend.emit(&VfsPath::new("/srv/a.txt"), RawEvent::Deleted), 1);

        match rx.try_recv() {
            Ok(PumpMessage::Backend(BackendMessage::Event { token, event, name })) => {
                assert_eq!(token, dir);
                assert_eq!(event, RawEvent::Deleted);
                assert_eq!(name.as_deref(), Some("a.txt"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_subscription_failures() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = ManualBackend::new();
        backend.connect(BackendSink::new(tx)).unwrap();

        backend.set_fail_subscribe(true);
        assert!(backend.subscribe(&VfsPath::new("/a"), WatchKind::File).is_err());
        backend.set_fail_subscribe(false);

        let token = backend.subscribe(&VfsPath::new("/a"), WatchKind::File).unwrap();
        assert_eq!(backend.subscription_count(), 1);

        backend.set_fail_unsubscribe(true);
        assert!(backend.unsubscribe(&token).is_err());
        backend.set_fail_unsubscribe(false);
        assert!(backend.unsubscribe(&token).is_ok());
        assert!(backend.unsubscribe(&token).is_err());
        assert_eq!(backend.subscription_count(), 0);
    }

    #[test]
    fn test_vanished_path_reports_missing_watch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = ManualBackend::new();
        backend.connect(BackendSink::new(tx)).unwrap();
        let path = VfsPath::new("/srv/x.txt");
        let token = backend.subscribe(&path, WatchKind::File).unwrap();

        backend.vanish(&path);
        let err = backend.unsubscribe(&token).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(backend.subscription_count(), 0);

        let err = backend.subscribe(&path, WatchKind::File).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(backend.subscription_count(), 0);
    }

    #[test]
    fn test_failing_connect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = ManualBackend::new().failing_connect();
        assert!(backend.connect(BackendSink::new(tx)).is_err());
        assert!(!backend.is_connected());
    }
}
