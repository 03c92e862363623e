//! Coalescing notification queue.
//!
//! The queue holds at most one pending notification per
//! `(HandleId, filename)` key. A burst of events on the same target collapses
//! into a single slot, and the slot keeps the highest-precedence event seen so
//! far (newest wins among equal tags). Keys are popped in first-insertion
//! order; only the per-key merge is part of the contract.
//!
//! Filenames are compared byte for byte. No case folding or Unicode
//! normalization is applied.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::events::{MonitorEvent, NotificationTag};
use crate::handle::HandleId;

type NotificationKey = (HandleId, Option<String>);

#[derive(Debug, Clone, Copy)]
struct Pending {
    tag: NotificationTag,
    event: MonitorEvent,
}

/// A notification removed from the queue for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notification {
    pub id: HandleId,
    pub tag: NotificationTag,
    pub event: MonitorEvent,
    pub filename: Option<String>,
}

/// What [`NotificationQueue::enqueue`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    /// A new queue entry was created.
    Queued,
    /// An existing entry for the key was overwritten.
    Coalesced,
    /// An existing entry with a higher tag was kept; the new one was dropped.
    Superseded,
}

#[derive(Debug, Default)]
pub(crate) struct NotificationQueue {
    order: VecDeque<NotificationKey>,
    pending: FxHashMap<NotificationKey, Pending>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &mut self,
        id: HandleId,
        tag: NotificationTag,
        event: MonitorEvent,
        filename: Option<&str>,
    ) -> Enqueued {
        let key = (id, filename.map(str::to_owned));
        if let Some(existing) = self.pending.get_mut(&key) {
            if tag >= existing.tag {
                existing.tag = tag;
                existing.event = event;
                return Enqueued::Coalesced;
            }
            return Enqueued::Superseded;
        }

        self.order.push_back(key.clone());
        self.pending.insert(key, Pending { tag, event });
        Enqueued::Queued
    }

    pub fn pop(&mut self) -> Option<Notification> {
        let key = self.order.pop_front()?;
        let pending = self.pending.remove(&key)?;
        let (id, filename) = key;
        Some(Notification {
            id,
            tag: pending.tag,
            event: pending.event,
            filename,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NotificationTag::{Backend, Injected};

    fn drain(queue: &mut NotificationQueue) -> Vec<Notification> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_duplicates_collapse_into_one_entry() {
        let mut queue = NotificationQueue::new();
        assert_eq!(
            queue.enqueue(HandleId(1), Injected, MonitorEvent::Created, None),
            Enqueued::Queued
        );
        for _ in 0..99 {
            assert_eq!(
                queue.enqueue(HandleId(1), Injected, MonitorEvent::Created, None),
                Enqueued::Coalesced
            );
        }
        assert_eq!(queue.len(), 1);

        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event, MonitorEvent::Created);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_injected_is_not_overwritten_by_backend() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(1), Injected, MonitorEvent::Deleted, Some("a.txt"));
        assert_eq!(
            queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, Some("a.txt")),
            Enqueued::Superseded
        );

        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event, MonitorEvent::Deleted);
        assert_eq!(delivered[0].tag, Injected);
    }

    #[test]
    fn test_injected_overwrites_backend() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, None);
        queue.enqueue(HandleId(1), Injected, MonitorEvent::Created, None);
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Deleted, None);

        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event, MonitorEvent::Created);
    }

    #[test]
    fn test_newest_wins_among_equal_tags() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(4), Backend, MonitorEvent::Created, Some("x"));
        queue.enqueue(HandleId(4), Backend, MonitorEvent::Changed, Some("x"));
        queue.enqueue(HandleId(4), Backend, MonitorEvent::Deleted, Some("x"));

        let delivered = drain(&mut queue);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event, MonitorEvent::Deleted);
    }

    #[test]
    fn test_distinct_keys_stay_separate() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, None);
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, Some("a"));
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, Some("A"));
        queue.enqueue(HandleId(2), Backend, MonitorEvent::Changed, None);

        let keys: Vec<_> = drain(&mut queue)
            .into_iter()
            .map(|n| (n.id, n.filename))
            .collect();
        assert_eq!(
            keys,
            vec![
                (HandleId(1), None),
                (HandleId(1), Some("a".to_owned())),
                (HandleId(1), Some("A".to_owned())),
                (HandleId(2), None),
            ]
        );
    }

    #[test]
    fn test_key_is_reusable_after_pop() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(1), Injected, MonitorEvent::Created, None);
        assert!(queue.pop().is_some());

        assert_eq!(
            queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, None),
            Enqueued::Queued
        );
        assert_eq!(queue.pop().map(|n| n.event), Some(MonitorEvent::Changed));
    }

    #[test]
    fn test_clear() {
        let mut queue = NotificationQueue::new();
        queue.enqueue(HandleId(1), Backend, MonitorEvent::Changed, None);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
