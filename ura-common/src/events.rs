//! Event types for the URA event system
//!
//! Provides ingest progress events and the EventBus used to broadcast them
//! to SSE subscribers and other in-process listeners.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// URA ingest event types
///
/// Events are broadcast via EventBus and can be serialized for SSE
/// transmission to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// A batch ingestion started
    BatchStarted {
        batch_id: Uuid,
        total_records: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One record finished processing (accepted, updated, or rejected)
    RecordProcessed {
        batch_id: Uuid,
        index: usize,
        object_id: Option<Uuid>,
        accepted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sentiment analysis finished for one review
    AnalysisCompleted {
        review_id: Uuid,
        methods_completed: usize,
        methods_failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Geocoding failed or found nothing for an address (non-fatal)
    GeocodeMissed {
        address: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch ingestion completed
    BatchCompleted {
        batch_id: Uuid,
        accepted: usize,
        updated: usize,
        rejected: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: non-blocking publish, multiple
/// concurrent subscribers, automatic cleanup when subscribers drop, and
/// lagged-message detection for slow subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` when nobody is listening (callers usually ignore this).
    pub fn emit(&self, event: IngestEvent) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Channel capacity this bus was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
