use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::operation_kind::OperationKind;

/// A queued mutation awaiting delivery to the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub entity: String,
    pub payload: Value,
    /// Sole ordering key; strictly increasing in insertion order.
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Earliest instant the next dispatch attempt may happen.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn new(
        kind: OperationKind,
        entity: impl Into<String>,
        payload: Value,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity: entity.into(),
            payload,
            enqueued_at,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Returns true if a sync cycle running at `now` may dispatch this operation.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// The remote resource identifier carried in `payload.id`.
    ///
    /// Strings are used as-is and numbers are rendered in decimal; anything
    /// else (missing, null, objects) yields `None`.
    pub fn resource_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.entity, self.id)
    }
}
