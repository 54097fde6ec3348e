//! Hand-off queue between the reader and the runner in decoupled mode.
//!
//! Single producer, single consumer, FIFO. The reader must never block on
//! the handler. The queue is unbounded by default and its backlog is
//! monitored: each time it doubles past the high-water mark a warning reports
//! the length. An explicitly bounded queue drops and counts events when full.
//! Dropping the sender is the end-of-stream signal; dropping the receiver
//! tells the reader the runner is gone.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::event::Event;

/// Backlog length that triggers the first high-water warning.
pub const DEFAULT_HIGH_WATER_MARK: usize = 10_000;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// The event is queued.
    Queued,
    /// The queue was full; the event was discarded.
    Dropped,
    /// The runner is gone.
    Closed,
}

/// Result of a timed pop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    #[allow(missing_docs)]
    Event(Event),
    /// Nothing arrived within the timeout.
    Empty,
    /// The reader closed the queue and everything queued has been consumed.
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    peak: AtomicUsize,
}

/// Create a hand-off queue. `None` means unbounded.
#[must_use]
pub fn channel(capacity: Option<usize>) -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = match capacity {
        Some(capacity) => bounded(capacity.max(1)),
        None => unbounded(),
    };
    let counters = Arc::new(Counters::default());
    (
        HandoffSender {
            tx,
            capacity,
            next_warning: AtomicUsize::new(DEFAULT_HIGH_WATER_MARK),
            warnings: AtomicU64::new(0),
            counters: Arc::clone(&counters),
        },
        HandoffReceiver { rx, counters },
    )
}

/// Producing half, owned by the reader.
#[derive(Debug)]
pub struct HandoffSender {
    tx: Sender<Event>,
    capacity: Option<usize>,
    next_warning: AtomicUsize,
    warnings: AtomicU64,
    counters: Arc<Counters>,
}

impl HandoffSender {
    /// Warn first when the backlog reaches `mark` events, then at each doubling.
    #[must_use]
    pub fn with_high_water_mark(self, mark: usize) -> Self {
        self.next_warning.store(mark.max(1), Ordering::Relaxed);
        self
    }

    /// Enqueue without blocking.
    pub fn push(&self, event: Event) -> Push {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                self.track_backlog();
                Push::Queued
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    capacity = ?self.capacity,
                    dropped,
                    origin_id = event.origin_id,
                    "hand-off queue full, dropping event"
                );
                Push::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Push::Closed,
        }
    }

    fn track_backlog(&self) {
        let len = self.tx.len();
        self.counters.peak.fetch_max(len, Ordering::Relaxed);
        let threshold = self.next_warning.load(Ordering::Relaxed);
        if len >= threshold {
            self.next_warning.store(threshold.saturating_mul(2), Ordering::Relaxed);
            self.warnings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                len,
                capacity = ?self.capacity,
                "hand-off queue backlog above high-water mark, handler is falling behind"
            );
        }
    }

    /// High-water warnings logged so far.
    #[must_use]
    pub fn high_water_warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Longest backlog seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Relaxed)
    }

    /// Events currently waiting for the runner.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Events discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Events successfully queued.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.counters.queued.load(Ordering::Relaxed)
    }
}

/// Consuming half, owned by the runner.
#[derive(Debug)]
pub struct HandoffReceiver {
    rx: Receiver<Event>,
    counters: Arc<Counters>,
}

impl HandoffReceiver {
    /// Block until an event is available. `None` once the reader has closed
    /// the queue and it is empty.
    pub fn pop(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Pop::Event(event),
            Err(RecvTimeoutError::Timeout) => Pop::Empty,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }

    /// Events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Events discarded by the sender because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
