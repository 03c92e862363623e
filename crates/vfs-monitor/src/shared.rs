//! Lazily created, shared monitor instance.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use vfs_core::MonitorConfig;

use crate::monitor::{Monitor, MonitorInner};

type Factory = Box<dyn Fn() -> Monitor + Send + Sync>;

/// Hands out one monitor to every client while at least one holds it.
///
/// The slot keeps only a weak reference: when the last [`Monitor`] obtained
/// from it is dropped, the service shuts down, and the next
/// [`acquire`](Self::acquire) starts a fresh one.
///
/// # Examples
///
/// ```
/// use vfs_core::{BackendKind, MonitorConfig};
/// use vfs_monitor::{Monitor, SharedMonitor};
///
/// let config = MonitorConfig { backend: BackendKind::None, ..MonitorConfig::default() };
/// let slot = SharedMonitor::new(config);
///
/// let a = slot.acquire();
/// let b = slot.acquire();
/// assert!(Monitor::ptr_eq(&a, &b));
/// ```
pub struct SharedMonitor {
    current: Mutex<Weak<MonitorInner>>,
    factory: Factory,
}

impl fmt::Debug for SharedMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMonitor")
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl SharedMonitor {
    /// Creates an empty slot that builds monitors with [`Monitor::new`].
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_factory(move || Monitor::new(config))
    }

    /// Creates an empty slot that builds monitors with `factory`.
    #[must_use]
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Monitor + Send + Sync + 'static,
    {
        Self {
            current: Mutex::new(Weak::new()),
            factory: Box::new(factory),
        }
    }

    /// Returns the live monitor, creating one if there is none.
    #[must_use]
    pub fn acquire(&self) -> Monitor {
        let mut current = self.current.lock();
        if let Some(inner) = current.upgrade() {
            return Monitor::from_inner(inner);
        }
        let monitor = (self.factory)();
        *current = monitor.downgrade();
        monitor
    }

    /// Returns `true` while some client still holds the monitor.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.current.lock().strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ManualBackend;
    use vfs_core::BackendKind;

    fn feed_only() -> MonitorConfig {
        MonitorConfig {
            interval_ms: 10,
            wait_poll_ms: 50,
            backend: BackendKind::None,
        }
    }

    #[test]
    fn test_acquire_shares_one_instance() {
        let slot = SharedMonitor::new(feed_only());
        assert!(!slot.is_live());

        let a = slot.acquire();
        let b = slot.acquire();
        assert!(Monitor::ptr_eq(&a, &b));
        assert!(slot.is_live());

        drop(a);
        assert!(slot.is_live());
        drop(b);
        assert!(!slot.is_live());
    }

    #[test]
    fn test_released_monitor_is_replaced() {
        let backend = ManualBackend::new();
        let factory_backend = backend.clone();
        let slot = SharedMonitor::with_factory(move || {
            Monitor::with_backend(feed_only(), factory_backend.clone())
        });

        let first = slot.acquire();
        assert!(backend.is_connected());
        drop(first);
        assert!(!backend.is_connected());

        let second = slot.acquire();
        assert!(backend.is_connected());
        assert!(second.is_backend_active());
    }
}
