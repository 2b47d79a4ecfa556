// Fan-out of collector events to live subscribers (one bounded queue per subscriber).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

struct Subscribers<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<T>>,
}

/// Delivers every sent value to all current subscribers.
///
/// `send` never waits: a subscriber whose queue is full misses that value,
/// other subscribers and the producer are unaffected.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }

    /// Registers a subscriber with a queue of `buffer` values (at least 1).
    /// Dropping the returned [`Subscription`] deregisters it.
    pub fn subscribe(&self, buffer: usize) -> (mpsc::Receiver<T>, Subscription) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut subs = lock(&self.inner);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.insert(id, tx);
        drop(subs);

        let inner = self.inner.clone();
        let cleanup = Box::new(move || {
            lock(&inner).senders.remove(&id);
        });
        (
            rx,
            Subscription {
                id,
                cleanup: Some(cleanup),
            },
        )
    }

    /// Delivers `value` to every subscriber with room in its queue.
    pub fn send(&self, value: T) {
        let subs = lock(&self.inner);
        for tx in subs.senders.values() {
            // Full or closed queues just miss this value.
            let _ = tx.try_send(value.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).senders.len()
    }
}

fn lock<T>(m: &Mutex<Subscribers<T>>) -> MutexGuard<'_, Subscribers<T>> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cleanup handle returned by [`Broadcaster::subscribe`].
///
/// Deregistering drops the subscriber's sender, so a pending `recv` returns
/// `None` once the queue is drained.
pub struct Subscription {
    id: u64,
    cleanup: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deregisters now instead of at drop.
    pub fn cancel(mut self) {
        self.run_cleanup();
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_increment() {
        let b = Broadcaster::<u32>::new();
        let (_rx1, s1) = b.subscribe(1);
        let (_rx2, s2) = b.subscribe(1);
        assert_eq!(s1.id(), 0);
        assert_eq!(s2.id(), 1);
        assert_eq!(b.subscriber_count(), 2);
    }

    #[test]
    fn dropping_subscription_deregisters() {
        let b = Broadcaster::<u32>::new();
        let (_rx, sub) = b.subscribe(4);
        assert_eq!(b.subscriber_count(), 1);
        drop(sub);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn zero_buffer_is_treated_as_one() {
        let b = Broadcaster::<u32>::new();
        let (mut rx, _sub) = b.subscribe(0);
        b.send(7);
        assert_eq!(rx.try_recv().ok(), Some(7));
    }
}
