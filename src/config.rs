//! Watch session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelName;
use crate::error::ConfigurationError;
use crate::stream::DEFAULT_LIVENESS_INTERVAL;

/// How events reach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// No handler: print each event.
    Echo,
    /// Handler runs on the reading thread.
    Inline,
    /// Handler runs on its own thread behind the hand-off queue.
    Decoupled,
}

/// Options for one watch session.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub channel: ChannelName,
    /// Bound on each individual wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Registered handler name. `None` selects echo mode.
    pub handler: Option<String>,
    /// Run the handler in its own worker.
    pub isolate: bool,
    /// Hand-off queue bound. `None` (the default) is unbounded and monitored;
    /// a bound drops events once the queue is full.
    pub handoff_capacity: Option<usize>,
    /// Longest single wait before the cancellation token is re-checked.
    pub liveness_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            channel: ChannelName::default(),
            timeout: None,
            handler: None,
            isolate: false,
            handoff_capacity: None,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }
}

impl WatchConfig {
    /// Session on `channel` with default options.
    #[must_use]
    pub fn new(channel: ChannelName) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    /// Per-wait timeout in whole seconds; `0` means wait indefinitely.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>) -> Self {
        self.handler = Some(name.into());
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn isolated(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_handoff_capacity(mut self, capacity: Option<usize>) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Check option combinations and pick the delivery mode.
    ///
    /// # Errors
    /// `ConfigurationError` for isolation without a handler, a zero liveness
    /// interval, or a zero-sized bounded queue.
    pub fn validate(&self) -> Result<DeliveryMode, ConfigurationError> {
        if self.liveness_interval.is_zero() {
            return Err(ConfigurationError::ZeroLivenessInterval);
        }
        match (&self.handler, self.isolate) {
            (None, true) => Err(ConfigurationError::IsolationWithoutHandler),
            (None, false) => Ok(DeliveryMode::Echo),
            (Some(_), false) => Ok(DeliveryMode::Inline),
            (Some(_), true) => {
                if self.handoff_capacity == Some(0) {
                    return Err(ConfigurationError::ZeroQueueCapacity);
                }
                Ok(DeliveryMode::Decoupled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_follow_handler_and_isolation() {
        let base = WatchConfig::default();
        assert_eq!(base.validate(), Ok(DeliveryMode::Echo));
        assert_eq!(
            base.clone().with_handler("log").validate(),
            Ok(DeliveryMode::Inline)
        );
        assert_eq!(
            base.clone().with_handler("log").isolated(true).validate(),
            Ok(DeliveryMode::Decoupled)
        );
    }

    #[test]
    fn isolation_requires_handler() {
        let cfg = WatchConfig::default().isolated(true);
        assert_eq!(cfg.validate(), Err(ConfigurationError::IsolationWithoutHandler));
    }

    #[test]
    fn zero_timeout_means_infinite() {
        assert_eq!(WatchConfig::default().with_timeout_secs(0).timeout, None);
        assert_eq!(
            WatchConfig::default().with_timeout_secs(5).timeout,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn decoupled_queue_is_unbounded_by_default() {
        assert_eq!(WatchConfig::default().handoff_capacity, None);
    }

    #[test]
    fn rejects_zero_liveness_and_zero_capacity() {
        let cfg = WatchConfig::default().with_liveness_interval(Duration::ZERO);
        assert_eq!(cfg.validate(), Err(ConfigurationError::ZeroLivenessInterval));

        let cfg = WatchConfig::default()
            .with_handler("log")
            .isolated(true)
            .with_handoff_capacity(Some(0));
        assert_eq!(cfg.validate(), Err(ConfigurationError::ZeroQueueCapacity));

        let unbounded = WatchConfig::default()
            .with_handler("log")
            .isolated(true)
            .with_handoff_capacity(None);
        assert_eq!(unbounded.validate(), Ok(DeliveryMode::Decoupled));
    }
}
