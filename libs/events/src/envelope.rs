//! Event envelope - the common wrapper for all monitoring events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventError, MonitorEvent};

/// The event envelope - common metadata for all monitoring events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic sequence number within one simulation run.
    pub seq: u64,

    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,

    /// The dotted event type (e.g., "group.added", "tour.completed").
    pub event_type: String,

    /// Event-specific payload.
    pub event: MonitorEvent,
}

impl EventEnvelope {
    /// Wraps an event, stamping it with the current time.
    pub fn new(seq: u64, event: MonitorEvent) -> Self {
        Self::at(seq, Utc::now(), event)
    }

    /// Wraps an event with an explicit timestamp.
    pub fn at(seq: u64, occurred_at: DateTime<Utc>, event: MonitorEvent) -> Self {
        Self {
            seq,
            occurred_at,
            event_type: event.event_type().to_string(),
            event,
        }
    }

    /// Single-line JSON rendering, suitable for JSON-lines output.
    pub fn to_json_line(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}
