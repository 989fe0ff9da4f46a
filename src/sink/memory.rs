//! Bounded in-process event buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::observability::metrics;
use crate::security::{now_millis, Admission, Mode};
use crate::sink::{split_events, EventSink, SinkError, SinkReceipt};

#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub project_id: String,
    pub mode: Mode,
    pub received_at: i64,
    pub event: Value,
}

/// Ring buffer keeping the newest `capacity` events.
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<StoredEvent>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|q| q.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest events last.
    pub fn recent(&self, limit: usize) -> Vec<StoredEvent> {
        match self.events.lock() {
            Ok(queue) => {
                let skip = queue.len().saturating_sub(limit);
                queue.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn accept(&self, admission: &Admission) -> Result<SinkReceipt, SinkError> {
        let (events, skipped) = split_events(&admission.payload);
        let received_at = now_millis();

        let mut queue = self
            .events
            .lock()
            .map_err(|_| SinkError::Unavailable("event buffer poisoned".into()))?;
        for event in &events {
            if queue.len() == self.capacity {
                queue.pop_front();
            }
            queue.push_back(StoredEvent {
                project_id: admission.project.id.clone(),
                mode: admission.mode,
                received_at,
                event: (*event).clone(),
            });
        }
        drop(queue);

        metrics::record_events("processed", events.len() as u64);
        if skipped > 0 {
            metrics::record_events("skipped", skipped as u64);
        }

        Ok(SinkReceipt {
            processed: events.len(),
            skipped,
        })
    }
}
