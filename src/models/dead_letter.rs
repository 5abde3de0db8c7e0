use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::operation::Operation;

/// An operation that exhausted its retries, kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: Operation,
    pub dropped_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(operation: Operation, dropped_at: DateTime<Utc>) -> Self {
        Self {
            operation,
            dropped_at,
        }
    }
}

impl fmt::Display for DeadLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dropped at {} after {} attempts: {}",
            self.operation,
            self.dropped_at.to_rfc3339(),
            self.operation.retry_count,
            self.operation.last_error.as_deref().unwrap_or("unknown error")
        )
    }
}
