//! Error descriptors stored inside state
//!
//! Collaborator failures never cross into the interactive thread as raised
//! errors. They are recorded as data on the affected entity instead.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout or temporary backend failure; the next tick retries
    #[default]
    Transient,
    /// Unknown unit, malformed response or missing file; retried on schedule
    /// but only logged once
    Permanent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// A failure recorded on an entity in the shared state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// When the failure was observed
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record a transient failure observed now
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Record a permanent failure observed now
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind() {
        assert!(!ErrorRecord::transient("timed out").is_permanent());
        assert!(ErrorRecord::permanent("unit not found").is_permanent());
    }

    #[test]
    fn test_display_is_message() {
        let record = ErrorRecord::transient("systemctl timed out after 5000ms");
        assert_eq!(record.to_string(), "systemctl timed out after 5000ms");
    }
}
