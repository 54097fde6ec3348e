//! Error types for pg-notify.
//!
//! Errors are grouped by the phase that produces them: subscribing to a
//! channel, validating session options, resolving a handler, and running a
//! handler. `NotifyError` wraps them all so callers can match on the family
//! or just propagate with `?`.

use thiserror::Error;

/// Errors establishing or keeping a channel subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid channel name '{channel}': {reason}")]
    InvalidChannel {
        channel: String,
        reason: String,
    },

    #[error("Connection is not live")]
    NotConnected,

    #[error("Connection lost: {message}")]
    ConnectionLost {
        message: String,
    },

    #[error("Notification backend error: {message}")]
    Backend {
        message: String,
    },
}

/// Invalid combinations of session options, detected before any I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Isolated dispatch requested but no handler is configured")]
    IsolationWithoutHandler,

    #[error("Liveness interval must be greater than zero")]
    ZeroLivenessInterval,

    #[error("Hand-off queue capacity must be greater than zero (use no capacity for an unbounded queue)")]
    ZeroQueueCapacity,

    #[error("Invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("Tables {} could not be found", tables.join(","))]
    UnknownTables {
        tables: Vec<String>,
    },
}

/// A handler identifier could not be turned into a handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Handler identifier cannot be empty")]
    EmptyIdentifier,

    #[error("Handler '{name}' is not registered (available: {})", available.join(", "))]
    NotFound {
        name: String,
        available: Vec<String>,
    },
}

/// Failure raised by a handler while processing an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {message}")]
    Failed {
        message: String,
    },

    #[error("Handler panicked: {message}")]
    Panicked {
        message: String,
    },

    #[error("Malformed change payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Handler output failed: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    /// Creates a generic handler failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Top-level error type for pg-notify.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Database error: {message}")]
    Database {
        message: String,
    },

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NotifyError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Returns true if this is a subscription error.
    #[must_use]
    pub const fn is_subscription(&self) -> bool {
        matches!(self, Self::Subscription(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a handler error.
    #[must_use]
    pub const fn is_handler(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// Returns true if the error happened while setting up a session,
    /// before any event was processed.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Resolution(_))
    }

    /// Process exit code for the command line binary.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Resolution(_) => 2,
            Self::Subscription(_) | Self::Database { .. } => 3,
            Self::Handler(_) => 4,
            Self::Io(_) | Self::Internal { .. } => 1,
        }
    }
}

/// Result type alias for pg-notify operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_channel_message() {
        let err = SubscriptionError::InvalidChannel {
            channel: "bad-name".to_string(),
            reason: "contains '-'".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("bad-name"));
        assert!(msg.contains("contains '-'"));
    }

    #[test]
    fn test_unknown_tables_lists_all() {
        let err = ConfigurationError::UnknownTables {
            tables: vec!["users".to_string(), "orders".to_string()],
        };
        assert_eq!(format!("{err}"), "Tables users,orders could not be found");
    }

    #[test]
    fn test_not_found_lists_available() {
        let err = ResolutionError::NotFound {
            name: "mqtt".to_string(),
            available: vec!["json".to_string(), "log".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("mqtt"));
        assert!(msg.contains("json, log"));
    }

    #[test]
    fn test_setup_errors() {
        let err: NotifyError = ConfigurationError::IsolationWithoutHandler.into();
        assert!(err.is_setup());
        assert!(err.is_configuration());

        let err: NotifyError = ResolutionError::EmptyIdentifier.into();
        assert!(err.is_setup());

        let err: NotifyError = SubscriptionError::NotConnected.into();
        assert!(!err.is_setup());
        assert!(err.is_subscription());
    }

    #[test]
    fn test_exit_codes() {
        let config: NotifyError = ConfigurationError::ZeroLivenessInterval.into();
        assert_eq!(config.exit_code(), 2);

        let sub: NotifyError = SubscriptionError::NotConnected.into();
        assert_eq!(sub.exit_code(), 3);

        let handler: NotifyError = HandlerError::failed("boom").into();
        assert!(handler.is_handler());
        assert_eq!(handler.exit_code(), 4);

        assert_eq!(NotifyError::internal("x").exit_code(), 1);
    }

    #[test]
    fn test_payload_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: HandlerError = serde_err.into();
        assert!(format!("{err}").contains("Malformed change payload"));
    }
}
