//! Change-detection backends.
//!
//! A [`Backend`] turns watch subscriptions into raw change events. The monitor
//! calls [`Backend::connect`] once with a [`BackendSink`], then subscribes and
//! unsubscribes under its own lock. Events are pushed through the sink from
//! whatever thread the backend runs on; a dedicated pump thread inside the
//! monitor translates them into queue entries.
//!
//! A fatal error returned by a backend (see [`BackendError::is_fatal`]), or a
//! [`BackendSink::fail`] report, permanently disables backend notifications
//! for that monitor. Fed events keep working. A missing path or watch only
//! costs the affected handle its backend events.
//!
//! Two implementations ship with the crate:
//!
//! - [`NotifyBackend`] over the platform watcher of the `notify` crate
//! - [`ManualBackend`], driven by hand from tests or embedders

mod manual;
mod watcher;

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::events::RawEvent;
use crate::handle::WatchKind;

pub use self::manual::ManualBackend;
pub use self::watcher::NotifyBackend;

use vfs_core::VfsPath;

/// Identifies one subscription inside the backend that issued it.
///
/// Each backend keeps its own token space; the variant records which one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionToken {
    /// Issued by [`NotifyBackend`].
    Notify(u64),
    /// Issued by [`ManualBackend`].
    Manual(u64),
}

/// A message pushed by a backend to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// A raw change for a subscription.
    Event {
        /// The subscription the change belongs to.
        token: SubscriptionToken,
        /// The raw signal.
        event: RawEvent,
        /// Child entry name for directory subscriptions, or an absolute path.
        name: Option<String>,
    },
    /// The backend's transport broke; no further events will arrive.
    Failed(String),
}

/// What travels over the pump channel.
#[derive(Debug)]
pub(crate) enum PumpMessage {
    Backend(BackendMessage),
    Stop,
}

/// Sending half handed to [`Backend::connect`].
#[derive(Debug, Clone)]
pub struct BackendSink {
    tx: mpsc::UnboundedSender<PumpMessage>,
}

impl BackendSink {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<PumpMessage>) -> Self {
        Self { tx }
    }

    /// Pushes a raw event for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Disconnected`] once the monitor has shut down.
    pub fn event(
        &self,
        token: SubscriptionToken,
        event: RawEvent,
        name: Option<String>,
    ) -> Result<(), BackendError> {
        self.send(BackendMessage::Event { token, event, name })
    }

    /// Reports a transport failure, disabling the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Disconnected`] once the monitor has shut down.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), BackendError> {
        self.send(BackendMessage::Failed(reason.into()))
    }

    /// Returns `true` once the receiving monitor is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, message: BackendMessage) -> Result<(), BackendError> {
        self.tx
            .send(PumpMessage::Backend(message))
            .map_err(|_| BackendError::Disconnected)
    }
}

/// A source of raw filesystem change events.
///
/// All methods are called with the monitor lock held, so implementations must
/// not block on the monitor (for example by waiting on the sink's receiver).
pub trait Backend: Send + 'static {
    /// A short name for logging.
    fn name(&self) -> &'static str;

    /// Opens the backend's transport. Called once, before any subscription.
    ///
    /// # Errors
    ///
    /// Any error leaves the monitor in feed-only mode.
    fn connect(&mut self, sink: BackendSink) -> Result<(), BackendError>;

    /// Starts watching `path`.
    ///
    /// # Errors
    ///
    /// A fatal error disables the backend for the rest of the monitor's life.
    /// A path that does not exist should be reported as
    /// [`notify::ErrorKind::PathNotFound`].
    fn subscribe(
        &mut self,
        path: &VfsPath,
        kind: WatchKind,
    ) -> Result<SubscriptionToken, BackendError>;

    /// Stops the subscription identified by `token`.
    ///
    /// # Errors
    ///
    /// A fatal error disables the backend for the rest of the monitor's life.
    /// A watch the platform already dropped should be reported as
    /// [`notify::ErrorKind::WatchNotFound`].
    fn unsubscribe(&mut self, token: &SubscriptionToken) -> Result<(), BackendError>;
}

/// Maps changed paths back to the subscriptions that cover them.
///
/// A change on `P` is reported to every subscription on `P` itself (without a
/// name) and to every directory subscription on `P`'s parent (with `P`'s last
/// component as the name).
#[derive(Debug, Default)]
pub(crate) struct RouteTable {
    by_path: FxHashMap<Utf8PathBuf, SmallVec<[(u64, WatchKind); 2]>>,
    by_token: FxHashMap<u64, Utf8PathBuf>,
    next_token: u64,
}

impl RouteTable {
    /// Adds a route and returns its token number together with the number of
    /// routes now sharing `path`.
    pub fn insert(&mut self, path: &Utf8Path, kind: WatchKind) -> (u64, usize) {
        self.next_token += 1;
        let token = self.next_token;
        let routes = self.by_path.entry(path.to_owned()).or_default();
        routes.push((token, kind));
        self.by_token.insert(token, path.to_owned());
        (token, routes.len())
    }

    /// Removes a route and returns its path together with the number of
    /// routes still sharing it.
    pub fn remove(&mut self, token: u64) -> Option<(Utf8PathBuf, usize)> {
        let path = self.by_token.remove(&token)?;
        let remaining = match self.by_path.get_mut(&path) {
            Some(routes) => {
                routes.retain(|(other, _)| *other != token);
                routes.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.by_path.remove(&path);
        }
        Some((path, remaining))
    }

    pub fn matches(&self, path: &Utf8Path) -> SmallVec<[(u64, Option<String>); 2]> {
        let mut found = SmallVec::new();
        if let Some(routes) = self.by_path.get(path) {
            found.extend(routes.iter().map(|(token, _)| (*token, None)));
        }
        let parent_routes = path
            .parent()
            .zip(path.file_name())
            .and_then(|(parent, name)| Some((self.by_path.get(parent)?, name)));
        if let Some((routes, name)) = parent_routes {
            found.extend(
                routes
                    .iter()
                    .filter(|(_, kind)| *kind == WatchKind::Directory)
                    .map(|(token, _)| (*token, Some(name.to_owned()))),
            );
        }
        found
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }
}
