//! Downstream hand-off for admitted events.
//!
//! # Data Flow
//! ```text
//! RequestValidator → Admission
//!     → EventSink::accept (project, mode, stripped payload)
//!     → SinkReceipt { processed, skipped } → HTTP response
//! ```

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::security::Admission;

pub use memory::{MemorySink, StoredEvent};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Counts reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReceipt {
    pub processed: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn accept(&self, admission: &Admission) -> Result<SinkReceipt, SinkError>;
}

/// Split a payload into individual events.
///
/// A payload with an `events` array is a batch: object entries are events,
/// anything else is skipped. Any other payload is a single event.
pub fn split_events(payload: &Value) -> (Vec<&Value>, usize) {
    match payload.get("events").and_then(Value::as_array) {
        Some(batch) => {
            let events: Vec<&Value> = batch.iter().filter(|e| e.is_object()).collect();
            let skipped = batch.len() - events.len();
            (events, skipped)
        }
        None => (vec![payload], 0),
    }
}
