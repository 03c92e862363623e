//! Backend over the platform watcher of the `notify` crate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 notify thread (inotify/FSEvents/...)         │
//! │  ┌───────────────────┐   ┌─────────────┐   ┌──────────────┐  │
//! │  │ RecommendedWatcher│ ─►│ classify    │ ─►│ RouteTable   │  │
//! │  │ (non-recursive)   │   │ (RawEvent)  │   │ (path→token) │  │
//! │  └───────────────────┘   └─────────────┘   └──────┬───────┘  │
//! └───────────────────────────────────────────────────│──────────┘
//!                                                     │ BackendSink
//!                                                     ▼
//!                                          monitor pump thread
//! ```
//!
//! One notify watch is kept per distinct path no matter how many handles
//! subscribe to it. Changes are reported to every subscription on the path
//! and to every directory subscription on its parent.

use std::path::PathBuf;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use smallvec::{SmallVec, smallvec};
use vfs_core::VfsPath;

use super::{Backend, BackendSink, RouteTable, SubscriptionToken};
use crate::error::BackendError;
use crate::events::RawEvent;
use crate::handle::WatchKind;

/// A [`Backend`] that watches paths through `notify`.
///
/// Watches are non-recursive: a directory subscription reports changes to
/// the directory itself and to its direct children.
///
/// # Examples
///
/// ```no_run
/// use vfs_core::{MonitorConfig, VfsPath};
/// use vfs_monitor::{Monitor, NotifyBackend};
///
/// let monitor = Monitor::with_backend(MonitorConfig::default(), NotifyBackend::new());
/// let handle = monitor.add_directory(VfsPath::new("/tmp"), |_, _, event, _, changed| {
///     println!("{event}: {changed}");
/// });
/// # monitor.remove(handle);
/// ```
#[derive(Default)]
pub struct NotifyBackend {
    watcher: Option<RecommendedWatcher>,
    routes: Arc<Mutex<RouteTable>>,
}

impl std::fmt::Debug for NotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyBackend")
            .field("connected", &self.watcher.is_some())
            .field("subscriptions", &self.routes.lock().len())
            .finish()
    }
}

impl NotifyBackend {
    /// Creates an unconnected backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn watcher(&mut self) -> Result<&mut RecommendedWatcher, BackendError> {
        self.watcher.as_mut().ok_or(BackendError::Disconnected)
    }
}

impl Backend for NotifyBackend {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn connect(&mut self, sink: BackendSink) -> Result<(), BackendError> {
        let routes = Arc::clone(&self.routes);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward(&routes, &sink, res);
        })?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn subscribe(
        &mut self,
        path: &VfsPath,
        kind: WatchKind,
    ) -> Result<SubscriptionToken, BackendError> {
        let (token, sharing) = self.routes.lock().insert(path.as_path(), kind);
        if sharing == 1 {
            let watched = self.watcher().and_then(|w| {
                w.watch(path.as_std_path(), RecursiveMode::NonRecursive)
                    .map_err(|err| {
                        vanished(err, path.as_path(), notify::Error::path_not_found)
                    })
            });
            if let Err(err) = watched {
                self.routes.lock().remove(token);
                return Err(err);
            }
        }
        tracing::trace!(path = %path, token, "notify watch added");
        Ok(SubscriptionToken::Notify(token))
    }

    fn unsubscribe(&mut self, token: &SubscriptionToken) -> Result<(), BackendError> {
        let SubscriptionToken::Notify(number) = token else {
            return Err(BackendError::UnknownToken(token.clone()));
        };
        let Some((path, remaining)) = self.routes.lock().remove(*number) else {
            return Err(BackendError::UnknownToken(token.clone()));
        };
        tracing::trace!(path = %path, token = number, "notify watch removed");
        if remaining == 0 {
            // The kernel already dropped the watch if the path was deleted.
            self.watcher()?
                .unwatch(path.as_std_path())
                .map_err(|err| vanished(err, &path, notify::Error::watch_not_found))?;
        }
        Ok(())
    }
}

/// Reports a failed (un)watch of a path that no longer exists as `missing`,
/// whatever error the platform watcher gave.
fn vanished(err: notify::Error, path: &Utf8Path, missing: fn() -> notify::Error) -> BackendError {
    if path.exists() {
        return err.into();
    }
    missing().add_path(path.as_std_path().to_path_buf()).into()
}

/// Runs on the notify thread for every event or error.
fn forward(routes: &Mutex<RouteTable>, sink: &BackendSink, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        // Errors without paths come from the watcher itself rather than
        // from one watched path.
        Err(err) if err.paths.is_empty() => {
            tracing::warn!(error = %err, "notify transport error");
            let _ = sink.fail(err.to_string());
            return;
        }
        Err(err) => {
            tracing::warn!(error = %err, paths = ?err.paths, "notify watch error");
            return;
        }
    };

    for (path, raw) in classify(event) {
        let path = match Utf8PathBuf::try_from(path) {
            Ok(path) => path,
            Err(e) => {
                let err = BackendError::NonUtf8Path(e.into_path_buf());
                tracing::warn!(error = %err, "Skipping notify event");
                continue;
            }
        };

        let targets = routes.lock().matches(&path);
        for (token, name) in targets {
            if sink
                .event(SubscriptionToken::Notify(token), raw, name)
                .is_err()
            {
                tracing::debug!("Monitor gone, dropping notify events");
                return;
            }
        }
    }
}

/// Splits a notify event into one raw event per affected path.
fn classify(event: Event) -> SmallVec<[(PathBuf, RawEvent); 2]> {
    let raw = match event.kind {
        EventKind::Create(_) => RawEvent::Created,
        EventKind::Remove(_) => RawEvent::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawEvent::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawEvent::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            return match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => {
                    smallvec![(from, RawEvent::Deleted), (to, RawEvent::Created)]
                }
                (Some(from), None) => smallvec![(from, RawEvent::Moved)],
                _ => SmallVec::new(),
            };
        }
        EventKind::Modify(_) => RawEvent::Changed,
        EventKind::Access(_) => RawEvent::Accessed,
        EventKind::Any | EventKind::Other => RawEvent::Other,
    };
    event.paths.into_iter().map(|path| (path, raw)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendMessage, PumpMessage};
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_classify_basic_kinds() {
        let created = classify(event(EventKind::Create(CreateKind::File), &["/a"]));
        assert_eq!(created.as_slice(), &[(PathBuf::from("/a"), RawEvent::Created)]);

        let removed = classify(event(EventKind::Remove(RemoveKind::Any), &["/a"]));
        assert_eq!(removed[0].1, RawEvent::Deleted);

        let modified = classify(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/a"],
        ));
        assert_eq!(modified[0].1, RawEvent::Changed);

        let accessed = classify(event(EventKind::Access(AccessKind::Any), &["/a"]));
        assert_eq!(accessed[0].1.to_monitor_event(), None);
    }

    #[test]
    fn test_classify_rename_pair() {
        let renamed = classify(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/dir/old", "/dir/new"],
        ));
        assert_eq!(
            renamed.as_slice(),
            &[
                (PathBuf::from("/dir/old"), RawEvent::Deleted),
                (PathBuf::from("/dir/new"), RawEvent::Created),
            ]
        );
    }

    #[test]
    fn test_forward_routes_to_directory_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = BackendSink::new(tx);
        let routes = Mutex::new(RouteTable::default());
        let (token, _) = routes
            .lock()
            .insert(camino::Utf8Path::new("/srv"), WatchKind::Directory);

        forward(
            &routes,
            &sink,
            Ok(event(EventKind::Create(CreateKind::File), &["/srv/new.txt"])),
        );

        match rx.try_recv() {
            Ok(PumpMessage::Backend(BackendMessage::Event { token: got, event, name })) => {
                assert_eq!(got, SubscriptionToken::Notify(token));
                assert_eq!(event, RawEvent::Created);
                assert_eq!(name.as_deref(), Some("new.txt"));
            }
            other => panic!("expected a routed event, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_transport_error_fails_backend() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = BackendSink::new(tx);
        let routes = Mutex::new(RouteTable::default());

        forward(&routes, &sink, Err(notify::Error::generic("queue overflow")));

        assert!(matches!(
            rx.try_recv(),
            Ok(PumpMessage::Backend(BackendMessage::Failed(reason))) if reason.contains("queue overflow")
        ));
    }

    #[test]
    fn test_unsubscribe_unknown_token() {
        let mut backend = NotifyBackend::new();
        assert!(matches!(
            backend.unsubscribe(&SubscriptionToken::Manual(1)),
            Err(BackendError::UnknownToken(_))
        ));
        assert!(matches!(
            backend.unsubscribe(&SubscriptionToken::Notify(1)),
            Err(BackendError::UnknownToken(_))
        ));
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let mut backend = NotifyBackend::new();
        let result = backend.subscribe(&VfsPath::new("/tmp"), WatchKind::Directory);
        assert!(matches!(result, Err(BackendError::Disconnected)));
        assert_eq!(backend.routes.lock().len(), 0);
    }

    #[test]
    fn test_watcher_reports_created_file() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let dir = VfsPath::try_from(temp_dir.path().to_path_buf()).expect("Invalid path");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = NotifyBackend::new();
        backend.connect(BackendSink::new(tx)).expect("connect failed");
        let token = backend
            .subscribe(&dir, WatchKind::Directory)
            .expect("subscribe failed");

        std::fs::write(temp_dir.path().join("test.txt"), "hello").expect("write failed");

        // Delivery latency varies between filesystems; allow a generous window.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let created = loop {
            match rx.try_recv() {
                Ok(PumpMessage::Backend(BackendMessage::Event { token: got, event, name })) => {
                    assert_eq!(got, token);
                    assert_eq!(name.as_deref(), Some("test.txt"));
                    if event == RawEvent::Created {
                        break true;
                    }
                }
                Ok(_) => {}
                Err(_) if std::time::Instant::now() >= deadline => break false,
                Err(_) => std::thread::sleep(Duration::from_millis(20)),
            }
        };
        assert!(created, "no create event for test.txt");

        backend.unsubscribe(&token).expect("unsubscribe failed");
    }

    #[test]
    fn test_watch_of_missing_path_is_recoverable() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let missing =
            VfsPath::try_from(temp_dir.path().join("missing.txt")).expect("Invalid path");

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = NotifyBackend::new();
        backend.connect(BackendSink::new(tx)).expect("connect failed");

        let err = backend
            .subscribe(&missing, WatchKind::File)
            .expect_err("watching a missing path must fail");
        assert!(err.is_recoverable(), "unexpected error kind: {err:?}");
        assert_eq!(backend.routes.lock().len(), 0);
    }

    #[test]
    fn test_unsubscribe_after_file_deleted_is_recoverable() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("x.txt");
        std::fs::write(&file, "x").expect("write failed");
        let path = VfsPath::try_from(file.clone()).expect("Invalid path");

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = NotifyBackend::new();
        backend.connect(BackendSink::new(tx)).expect("connect failed");
        let token = backend.subscribe(&path, WatchKind::File).expect("subscribe failed");

        std::fs::remove_file(&file).expect("remove failed");
        std::thread::sleep(Duration::from_millis(100));

        // Either the watch was still there or the kernel had dropped it.
        if let Err(err) = backend.unsubscribe(&token) {
            assert!(err.is_recoverable(), "unexpected error kind: {err:?}");
        }
        assert_eq!(backend.routes.lock().len(), 0);
    }
}
