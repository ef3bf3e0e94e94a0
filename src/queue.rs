//! Task Queue
//!
//! Unbounded FIFO of pending work with a single-flight drain guard. Producers
//! push items and then try to take the guard; whoever wins drains the queue,
//! everyone else returns immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::transport::{MediaSource, Notifier};

/// One unit of requested work. Lives only in memory.
#[derive(Clone)]
pub struct QueueItem {
    pub source: MediaSource,
    /// `None` for items recovered at startup: their requester is gone.
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl QueueItem {
    pub fn live(source: MediaSource, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            source,
            notifier: Some(notifier),
        }
    }

    pub fn recovered(source: MediaSource) -> Self {
        Self {
            source,
            notifier: None,
        }
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("source", &self.source)
            .field("recovered", &self.notifier.is_none())
            .finish()
    }
}

pub struct TaskQueue {
    items: Mutex<VecDeque<QueueItem>>,
    draining: AtomicBool,
    /// Items enqueued but not yet marked done (queued + in flight).
    unfinished: watch::Sender<usize>,
}

/// Held by the single worker while it drains. Dropping it reopens the slot.
pub struct DrainGuard<'a> {
    queue: &'a TaskQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self {
            items: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            unfinished,
        }
    }

    pub fn push(&self, item: QueueItem) {
        let mut items = self.lock_items();
        items.push_back(item);
        self.unfinished.send_modify(|n| *n += 1);
    }

    pub fn pop(&self) -> Option<QueueItem> {
        self.lock_items().pop_front()
    }

    /// Number of items waiting (the in-flight item is not counted).
    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every waiting item. The in-flight item is unaffected.
    pub fn clear(&self) -> usize {
        let mut items = self.lock_items();
        let removed = items.len();
        items.clear();
        if removed > 0 {
            self.unfinished.send_modify(|n| *n = n.saturating_sub(removed));
        }
        removed
    }

    /// Mark one dequeued item as having reached a terminal state.
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Take the single-flight slot, or `None` if another worker holds it.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { queue: self })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Resolves once every enqueued item was either marked done or cleared.
    pub async fn wait_idle(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<QueueItem>> {
        // A poisoned lock only means a panic elsewhere; the deque is still valid.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(id: &str) -> QueueItem {
        QueueItem::recovered(MediaSource::new(id, None))
    }

    #[test]
    fn fifo_order() {
        let q = TaskQueue::new();
        q.push(item("a"));
        q.push(item("b"));
        q.push(item("c"));
        assert_eq!(q.len(), 3);

        let order: Vec<String> = std::iter::from_fn(|| q.pop())
            .map(|i| i.source.source_id)
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn only_one_drain_at_a_time() {
        let q = TaskQueue::new();
        let guard = q.try_begin_drain().expect("first drain");
        assert!(q.is_draining());
        assert!(q.try_begin_drain().is_none());

        drop(guard);
        assert!(!q.is_draining());
        assert!(q.try_begin_drain().is_some());
    }

    #[test]
    fn clear_drops_waiting_items() {
        let q = TaskQueue::new();
        q.push(item("a"));
        q.push(item("b"));
        q.push(item("c"));
        let in_flight = q.pop().unwrap();

        assert_eq!(q.clear(), 2);
        assert_eq!(q.len(), 0);
        assert_eq!(in_flight.source.source_id, "a");
        assert_eq!(*q.unfinished.borrow(), 1);
    }

    #[tokio::test]
    async fn wait_idle_waits_for_task_done() {
        let q = Arc::new(TaskQueue::new());
        q.wait_idle().await;

        q.push(item("a"));
        let _ = q.pop();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        q.task_done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("idle after task_done")
            .unwrap();
    }
}
