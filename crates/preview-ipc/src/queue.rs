//! Bounded single-producer/single-consumer queue with drop-on-full.
//!
//! The producer never blocks: pushing into a full queue discards the new
//! item. The consumer can poll without blocking or wait with a timeout.
//! Once the producer handle is dropped the consumer drains what is left and
//! then reports [`Dequeue::Closed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

/// Outcome of offering an item to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The item was appended.
    Accepted,

    /// The queue was full; the item was discarded.
    Dropped,

    /// The consumer is gone; the item was discarded.
    Closed,
}

/// Outcome of taking an item from the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue<T> {
    /// The oldest item.
    Item(T),

    /// Nothing available yet.
    Empty,

    /// The producer is gone and every item has been taken.
    Closed,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    dequeued: AtomicU64,
}

/// Counters of a queue at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Maximum number of items held.
    pub capacity: usize,

    /// Items accepted since creation.
    pub enqueued: u64,

    /// Items discarded because the queue was full.
    pub dropped: u64,

    /// Items taken by the consumer.
    pub dequeued: u64,
}

impl QueueSnapshot {
    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.enqueued.saturating_sub(self.dequeued) as usize
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only view of a queue's counters, shareable with a metrics collector.
#[derive(Debug, Clone)]
pub struct QueueMonitor {
    counters: Arc<QueueCounters>,
    capacity: usize,
}

impl QueueMonitor {
    /// Take a snapshot of the counters.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            capacity: self.capacity,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            dequeued: self.counters.dequeued.load(Ordering::Relaxed),
        }
    }
}

/// Producing end of a bounded queue.
pub struct QueueProducer<T> {
    sender: Sender<T>,
    counters: Arc<QueueCounters>,
    capacity: usize,
}

/// Consuming end of a bounded queue.
pub struct QueueConsumer<T> {
    receiver: Receiver<T>,
    counters: Arc<QueueCounters>,
    capacity: usize,
}

/// Create a bounded queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    assert!(capacity > 0, "queue capacity must be at least 1");

    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    let counters = Arc::new(QueueCounters::default());

    (
        QueueProducer {
            sender,
            counters: Arc::clone(&counters),
            capacity,
        },
        QueueConsumer {
            receiver,
            counters,
            capacity,
        },
    )
}

impl<T> QueueProducer<T> {
    /// Offer an item without blocking; a full queue drops it.
    pub fn push(&self, item: T) -> Enqueue {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Enqueue::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Enqueue::Closed,
        }
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter view for metrics.
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            counters: Arc::clone(&self.counters),
            capacity: self.capacity,
        }
    }
}

impl<T> QueueConsumer<T> {
    /// Take the oldest item without blocking.
    pub fn try_pop(&self) -> Dequeue<T> {
        match self.receiver.try_recv() {
            Ok(item) => self.taken(item),
            Err(TryRecvError::Empty) => Dequeue::Empty,
            Err(TryRecvError::Disconnected) => Dequeue::Closed,
        }
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Dequeue<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => self.taken(item),
            Err(RecvTimeoutError::Timeout) => Dequeue::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Closed,
        }
    }

    fn taken(&self, item: T) -> Dequeue<T> {
        self.counters.dequeued.fetch_add(1, Ordering::Relaxed);
        Dequeue::Item(item)
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter view for metrics.
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor {
            counters: Arc::clone(&self.counters),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_full_queue_drops_newest() {
        let (producer, consumer) = bounded_queue(10);

        for frame in 1..=15 {
            producer.push(frame);
        }

        assert_eq!(producer.len(), 10);
        let kept: Vec<i32> = std::iter::from_fn(|| match consumer.try_pop() {
            Dequeue::Item(frame) => Some(frame),
            _ => None,
        })
        .collect();
        assert_eq!(kept, (1..=10).collect::<Vec<_>>());

        let snapshot = consumer.monitor().snapshot();
        assert_eq!(snapshot.enqueued, 10);
        assert_eq!(snapshot.dropped, 5);
        assert_eq!(snapshot.dequeued, 10);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_push_reports_outcome() {
        let (producer, consumer) = bounded_queue(1);

        assert_eq!(producer.push('a'), Enqueue::Accepted);
        assert_eq!(producer.push('b'), Enqueue::Dropped);

        drop(consumer);
        assert_eq!(producer.push('c'), Enqueue::Closed);
    }

    #[test]
    fn test_empty_then_closed_after_drain() {
        let (producer, consumer) = bounded_queue(4);

        assert_eq!(consumer.try_pop(), Dequeue::Empty);
        assert_eq!(
            consumer.pop_timeout(Duration::from_millis(5)),
            Dequeue::Empty
        );

        producer.push(7u8);
        drop(producer);

        assert_eq!(consumer.try_pop(), Dequeue::Item(7));
        assert_eq!(consumer.try_pop(), Dequeue::Closed);
        assert_eq!(
            consumer.pop_timeout(Duration::from_millis(5)),
            Dequeue::Closed
        );
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let (producer, consumer) = bounded_queue(2);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(42u32);
        });

        assert_eq!(consumer.pop_timeout(Duration::from_secs(5)), Dequeue::Item(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_fast_producer_saturates_at_capacity() {
        let (producer, consumer) = bounded_queue(20);

        for chunk in 0..200u32 {
            producer.push(chunk);
            assert!(producer.len() <= 20);
        }

        assert_eq!(consumer.len(), 20);
        assert_eq!(consumer.monitor().snapshot().dropped, 180);
    }

    #[test]
    fn test_concurrent_order_preserved() {
        let (producer, consumer) = bounded_queue(8);

        let writer = thread::spawn(move || {
            for i in 0..2_000u32 {
                producer.push(i);
                if i % 16 == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::new();
        loop {
            match consumer.pop_timeout(Duration::from_millis(50)) {
                Dequeue::Item(i) => {
                    assert!(consumer.len() <= 8);
                    received.push(i);
                }
                Dequeue::Empty => continue,
                Dequeue::Closed => break,
            }
        }
        writer.join().unwrap();

        assert!(!received.is_empty());
        assert!(received.windows(2).all(|w| w[0] < w[1]));

        let snapshot = consumer.monitor().snapshot();
        assert_eq!(snapshot.enqueued + snapshot.dropped, 2_000);
        assert_eq!(snapshot.dequeued as usize, received.len());
    }
}
