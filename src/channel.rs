//! Channel names and SQL identifier validation.
//!
//! Channel and table names are interpolated into `LISTEN` and trigger DDL, so
//! they are restricted to PostgreSQL's unquoted identifier syntax and folded
//! to lower case the same way the server folds them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, SubscriptionError};

/// Longest identifier PostgreSQL keeps without truncation (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Channel used by the installed trigger function when none is given.
pub const DEFAULT_CHANNEL: &str = "events";

/// Checks `value` against unquoted identifier rules and returns the folded form.
///
/// On failure the reason is returned as a human readable string; callers wrap
/// it in the error type of their phase.
pub fn fold_identifier(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err("identifier cannot be empty".to_string());
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(format!("identifier exceeds {MAX_IDENTIFIER_LEN} bytes"));
    }

    let mut chars = value.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(format!("must start with a letter or '_', found '{first}'"));
        }
    }
    if let Some(bad) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("contains '{bad}'"));
    }

    Ok(value.to_ascii_lowercase())
}

/// Validates a table identifier for trigger installation.
pub fn table_identifier(value: &str) -> Result<String, ConfigurationError> {
    fold_identifier(value).map_err(|reason| ConfigurationError::InvalidIdentifier {
        kind: "table",
        value: value.to_string(),
        reason,
    })
}

/// A validated, case-folded notification channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Parses a channel name.
    ///
    /// # Errors
    /// `SubscriptionError::InvalidChannel` if the name is empty, too long or
    /// contains characters outside `[A-Za-z0-9_]`.
    pub fn parse(value: &str) -> Result<Self, SubscriptionError> {
        fold_identifier(value)
            .map(Self)
            .map_err(|reason| SubscriptionError::InvalidChannel {
                channel: value.to_string(),
                reason,
            })
    }

    /// The folded channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelName {
    fn default() -> Self {
        Self(DEFAULT_CHANNEL.to_string())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = SubscriptionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}
