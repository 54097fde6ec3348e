use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::channel::ChannelName;
use crate::error::SubscriptionError;
use crate::event::RawNotification;

use super::NotificationSource;

#[derive(Debug)]
struct Shared {
    live: AtomicBool,
    subscribe_calls: AtomicUsize,
    listening: Mutex<BTreeSet<String>>,
}

/// Create a connected in-memory source and the injector that feeds it.
#[must_use]
pub fn memory_source() -> (MemorySource, MemoryInjector) {
    let (tx, rx) = unbounded();
    let shared = Arc::new(Shared {
        live: AtomicBool::new(true),
        subscribe_calls: AtomicUsize::new(0),
        listening: Mutex::new(BTreeSet::new()),
    });
    (
        MemorySource {
            rx,
            shared: Arc::clone(&shared),
            pending: VecDeque::new(),
        },
        MemoryInjector { tx, shared },
    )
}

/// In-process notification source.
///
/// Notifications sent on channels the source is not listening on are
/// discarded when drained, like a server that only delivers to listeners.
#[derive(Debug)]
pub struct MemorySource {
    rx: Receiver<RawNotification>,
    shared: Arc<Shared>,
    pending: VecDeque<RawNotification>,
}

impl MemorySource {
    fn is_listening(&self, channel: &str) -> bool {
        self.shared
            .listening
            .lock()
            .map(|set| set.contains(channel))
            .unwrap_or(false)
    }
}

impl NotificationSource for MemorySource {
    fn subscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError> {
        self.shared.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        if !self.shared.live.load(Ordering::Acquire) {
            return Err(SubscriptionError::NotConnected);
        }
        let mut set = self
            .shared
            .listening
            .lock()
            .map_err(|_| SubscriptionError::Backend {
                message: "listener set poisoned".to_string(),
            })?;
        set.insert(channel.as_str().to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError> {
        if let Ok(mut set) = self.shared.listening.lock() {
            set.remove(channel.as_str());
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool, SubscriptionError> {
        if !self.pending.is_empty() {
            return Ok(true);
        }
        let received = match timeout {
            Some(timeout) => self.rx.recv_timeout(timeout),
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(raw) => {
                self.pending.push_back(raw);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(SubscriptionError::ConnectionLost {
                message: "memory injector dropped".to_string(),
            }),
        }
    }

    fn drain(&mut self) -> Result<Vec<RawNotification>, SubscriptionError> {
        let mut buffered: Vec<RawNotification> = self.pending.drain(..).collect();
        buffered.extend(self.rx.try_iter());
        buffered.retain(|raw| self.is_listening(&raw.channel));
        Ok(buffered)
    }
}

/// Feeding side of a `MemorySource`; plays the role of the database.
#[derive(Debug, Clone)]
pub struct MemoryInjector {
    tx: Sender<RawNotification>,
    shared: Arc<Shared>,
}

impl MemoryInjector {
    /// Send a notification. Returns false once the source is gone.
    pub fn notify(&self, origin_id: u32, channel: &str, payload: &str) -> bool {
        self.send(RawNotification::new(origin_id, channel.to_ascii_lowercase(), payload))
    }

    /// Send a prepared notification.
    pub fn send(&self, raw: RawNotification) -> bool {
        self.tx.send(raw).is_ok()
    }

    /// Number of subscribe attempts the source has seen.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.shared.subscribe_calls.load(Ordering::Relaxed)
    }

    /// Channels the source currently listens on.
    #[must_use]
    pub fn listening(&self) -> Vec<String> {
        self.shared
            .listening
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Mark the connection as down. Later subscribes fail; waits still see
    /// what was already sent, then report the loss once every injector clone
    /// is dropped.
    pub fn disconnect(&self) {
        self.shared.live.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> ChannelName {
        ChannelName::parse("events").unwrap()
    }

    #[test]
    fn resubscribe_does_not_duplicate() {
        let (mut source, injector) = memory_source();
        source.subscribe(&events()).unwrap();
        source.subscribe(&events()).unwrap();
        assert_eq!(injector.listening(), vec!["events".to_string()]);
        assert_eq!(injector.subscribe_calls(), 2);

        injector.notify(1, "events", "a");
        assert!(source.wait(Some(Duration::from_millis(100))).unwrap());
        assert_eq!(source.drain().unwrap().len(), 1);
    }

    #[test]
    fn drain_filters_unsubscribed_channels() {
        let (mut source, injector) = memory_source();
        source.subscribe(&events()).unwrap();
        injector.notify(1, "other", "x");
        injector.notify(1, "events", "y");

        assert!(source.wait(Some(Duration::from_millis(100))).unwrap());
        let drained = source.drain().unwrap();
        assert_eq!(drained, vec![RawNotification::new(1, "events", "y")]);
    }

    #[test]
    fn wait_times_out_without_error() {
        let (mut source, _injector) = memory_source();
        source.subscribe(&events()).unwrap();
        assert!(!source.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn subscribe_fails_when_disconnected() {
        let (mut source, injector) = memory_source();
        injector.disconnect();
        assert!(matches!(
            source.subscribe(&events()),
            Err(SubscriptionError::NotConnected)
        ));
    }

    #[test]
    fn wait_reports_lost_connection() {
        let (mut source, injector) = memory_source();
        source.subscribe(&events()).unwrap();
        drop(injector);
        assert!(matches!(
            source.wait(None),
            Err(SubscriptionError::ConnectionLost { .. })
        ));
    }
}
