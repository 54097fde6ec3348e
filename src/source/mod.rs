//! Notification sources.
//!
//! A source is a connection that can subscribe to channels, block until
//! notifications are ready, and hand over everything it has buffered. The
//! event stream is written against this trait so the watch loop can run on a
//! live PostgreSQL connection or on the in-memory source used for tests and
//! embedding.

use std::time::Duration;

use crate::channel::ChannelName;
use crate::error::SubscriptionError;
use crate::event::RawNotification;

/// In-memory source.
pub mod memory;
/// PostgreSQL `LISTEN` source.
#[cfg(feature = "postgres")]
pub mod pg;

pub use memory::{memory_source, MemoryInjector, MemorySource};
#[cfg(feature = "postgres")]
pub use pg::PgSource;

/// Contract for a subscribable notification connection.
///
/// Implementations own their connection; the watch loop is the only caller
/// and never shares a source between threads.
pub trait NotificationSource: Send {
    /// Start delivering notifications for `channel`. Subscribing twice to the
    /// same channel must not duplicate deliveries.
    fn subscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError>;

    /// Stop delivering notifications for `channel`.
    fn unsubscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError>;

    /// Block until at least one notification is buffered or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` on timeout.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool, SubscriptionError>;

    /// Take every buffered notification, in arrival order, without blocking.
    fn drain(&mut self) -> Result<Vec<RawNotification>, SubscriptionError>;
}

impl<S: NotificationSource + ?Sized> NotificationSource for Box<S> {
    fn subscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError> {
        (**self).subscribe(channel)
    }

    fn unsubscribe(&mut self, channel: &ChannelName) -> Result<(), SubscriptionError> {
        (**self).unsubscribe(channel)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool, SubscriptionError> {
        (**self).wait(timeout)
    }

    fn drain(&mut self) -> Result<Vec<RawNotification>, SubscriptionError> {
        (**self).drain()
    }
}
