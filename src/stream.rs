//! Pull-based event stream over a notification source.
//!
//! Each call to `next` performs at most one readiness wait per delivered
//! batch. When the source reports readiness, every buffered notification is
//! drained into a local FIFO and handed out one per call, so arrival order is
//! preserved and nothing is coalesced.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::channel::ChannelName;
use crate::error::SubscriptionError;
use crate::event::{Event, Subscription};
use crate::source::NotificationSource;

/// Default cap on a single wait when a cancellation token is attached.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one `EventStream::next` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// The next notification, in arrival order.
    Event(Event),
    /// No notification arrived within the timeout. Not an error.
    Timeout,
    /// The cancellation token fired.
    Cancelled,
}

/// A subscribed, logically infinite stream of events.
///
/// Dropping the stream unsubscribes (best effort).
#[derive(Debug)]
pub struct EventStream<S: NotificationSource> {
    source: S,
    subscription: Subscription,
    buffer: VecDeque<Event>,
    cancel: CancellationToken,
    liveness: Duration,
    closed: bool,
}

impl<S: NotificationSource> EventStream<S> {
    /// Subscribe `source` to `channel`.
    ///
    /// On failure the source is dropped, releasing the connection.
    pub fn open(mut source: S, channel: ChannelName, cancel: CancellationToken) -> Result<Self, SubscriptionError> {
        source.subscribe(&channel)?;
        let subscription = Subscription::new(channel);
        tracing::info!(
            channel = %subscription.channel,
            subscription_id = %subscription.id,
            "waiting for notifications"
        );
        Ok(Self {
            source,
            subscription,
            buffer: VecDeque::new(),
            cancel,
            liveness: DEFAULT_LIVENESS_INTERVAL,
            closed: false,
        })
    }

    /// Cap every individual wait at `interval` so cancellation is observed
    /// even with an infinite timeout.
    #[must_use]
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness = interval.max(Duration::from_millis(1));
        self
    }

    /// The active subscription.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Number of drained events not yet returned.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Wait for the next event.
    ///
    /// `timeout` bounds this call only; `None` waits until an event arrives
    /// or the stream is cancelled. Cancellation is checked before the buffer,
    /// so a cancelled stream stops at once and leaves drained events unread.
    pub fn next(&mut self, timeout: Option<Duration>) -> Result<Next, SubscriptionError> {
        // A timeout too large to represent as an instant waits indefinitely.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut polled = false;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Next::Cancelled);
            }
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Next::Event(event));
            }

            // The source is polled at least once, even with an elapsed deadline.
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() && polled {
                        return Ok(Next::Timeout);
                    }
                    remaining.min(self.liveness)
                }
                None => self.liveness,
            };
            polled = true;

            if self.source.wait(Some(slice))? {
                let drained = self.source.drain()?;
                tracing::trace!(count = drained.len(), "drained notifications");
                self.buffer.extend(drained.into_iter().map(Event::from));
            }
        }
    }

    /// Lazy iterator over events. Timeouts are skipped; the iterator ends on
    /// cancellation and yields the error that ended the subscription, if any.
    pub fn events(&mut self, timeout: Option<Duration>) -> Events<'_, S> {
        Events {
            stream: self,
            timeout,
            done: false,
        }
    }

    /// Unsubscribe and release the source.
    pub fn close(mut self) -> Result<(), SubscriptionError> {
        self.closed = true;
        self.source.unsubscribe(&self.subscription.channel)?;
        tracing::debug!(channel = %self.subscription.channel, "unsubscribed");
        Ok(())
    }
}

impl<S: NotificationSource> Drop for EventStream<S> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.source.unsubscribe(&self.subscription.channel);
        }
    }
}

/// Iterator returned by `EventStream::events`.
pub struct Events<'a, S: NotificationSource> {
    stream: &'a mut EventStream<S>,
    timeout: Option<Duration>,
    done: bool,
}

impl<S: NotificationSource> Iterator for Events<'_, S> {
    type Item = Result<Event, SubscriptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.stream.next(self.timeout) {
                Ok(Next::Event(event)) => return Some(Ok(event)),
                Ok(Next::Timeout) => continue,
                Ok(Next::Cancelled) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory_source;

    fn channel() -> ChannelName {
        ChannelName::parse("events").unwrap()
    }

    #[test]
    fn open_fails_on_dead_connection() {
        let (source, injector) = memory_source();
        injector.disconnect();
        let err = EventStream::open(source, channel(), CancellationToken::new()).unwrap_err();
        assert!(matches!(err, SubscriptionError::NotConnected));
    }

    #[test]
    fn next_preserves_arrival_order_across_batches() {
        let (source, injector) = memory_source();
        let mut stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();

        for i in 0..5 {
            injector.notify(1, "events", &i.to_string());
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            let Next::Event(event) = stream.next(Some(Duration::from_secs(1))).unwrap() else {
                panic!("expected event");
            };
            seen.push(event.payload);
        }
        for i in 5..8 {
            injector.notify(1, "events", &i.to_string());
        }
        for _ in 0..5 {
            let Next::Event(event) = stream.next(Some(Duration::from_secs(1))).unwrap() else {
                panic!("expected event");
            };
            seen.push(event.payload);
        }

        let expected: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn timeout_is_not_an_error_and_waiting_resumes() {
        let (source, injector) = memory_source();
        let mut stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();

        assert_eq!(stream.next(Some(Duration::from_millis(20))).unwrap(), Next::Timeout);
        assert_eq!(stream.next(Some(Duration::from_millis(20))).unwrap(), Next::Timeout);

        injector.notify(9, "events", "after-timeout");
        let next = stream.next(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(
            next,
            Next::Event(Event {
                origin_id: 9,
                channel: "events".to_string(),
                payload: "after-timeout".to_string(),
            })
        );
    }

    #[test]
    fn zero_timeout_returns_pending_notification() {
        let (source, injector) = memory_source();
        let mut stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();

        injector.notify(4, "events", "ready");
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(stream.next(Some(Duration::ZERO)).unwrap());
        }
        assert!(matches!(&results[0], Next::Event(e) if e.payload == "ready"));
        assert_eq!(results[1], Next::Timeout);
        assert_eq!(results[2], Next::Timeout);
    }

    #[test]
    fn oversized_timeout_waits_like_no_timeout() {
        let (source, injector) = memory_source();
        let mut stream = EventStream::open(source, channel(), CancellationToken::new())
            .unwrap()
            .with_liveness_interval(Duration::from_millis(5));

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            injector.notify(1, "events", "late");
            injector
        });
        let next = stream.next(Some(Duration::from_secs(u64::MAX))).unwrap();
        assert!(matches!(next, Next::Event(e) if e.payload == "late"));
        drop(sender.join().unwrap());
    }

    #[test]
    fn cancellation_interrupts_an_infinite_wait() {
        let (source, _injector) = memory_source();
        let cancel = CancellationToken::new();
        let mut stream = EventStream::open(source, channel(), cancel.clone())
            .unwrap()
            .with_liveness_interval(Duration::from_millis(10));

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        });
        assert_eq!(stream.next(None).unwrap(), Next::Cancelled);
        canceller.join().unwrap();
    }

    #[test]
    fn events_iterator_skips_timeouts_and_stops_on_cancel() {
        let (source, injector) = memory_source();
        let cancel = CancellationToken::new();
        let mut stream = EventStream::open(source, channel(), cancel.clone()).unwrap();

        injector.notify(1, "events", "a");
        injector.notify(1, "events", "b");

        let mut payloads = Vec::new();
        for event in stream.events(Some(Duration::from_millis(5))) {
            payloads.push(event.unwrap().payload);
            if payloads.len() == 2 {
                cancel.cancel();
            }
        }
        assert_eq!(payloads, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn events_iterator_surfaces_connection_loss() {
        let (source, injector) = memory_source();
        let mut stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();
        drop(injector);

        let mut events = stream.events(None);
        assert!(matches!(
            events.next(),
            Some(Err(SubscriptionError::ConnectionLost { .. }))
        ));
        assert!(events.next().is_none());
    }

    #[test]
    fn close_and_drop_unsubscribe() {
        let (source, injector) = memory_source();
        let stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();
        assert_eq!(injector.listening(), vec!["events".to_string()]);
        stream.close().unwrap();
        assert!(injector.listening().is_empty());

        let (source, injector) = memory_source();
        let stream = EventStream::open(source, channel(), CancellationToken::new()).unwrap();
        drop(stream);
        assert!(injector.listening().is_empty());
    }
}
