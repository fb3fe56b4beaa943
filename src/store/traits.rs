//! Storage trait for detections and dead letters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::dead_letter::DeadLetter;
use crate::schema::DetectionEvent;

/// Backend-agnostic persistence for the pipeline.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ── Detections ──────────────────────────────────────────────────

    /// Insert or overwrite the row keyed by `event.event_id`.
    async fn upsert_detection(&self, event: &DetectionEvent) -> Result<(), DatabaseError>;

    /// Look up a detection by ID.
    async fn get_detection(&self, event_id: &str) -> Result<Option<DetectionEvent>, DatabaseError>;

    /// Total stored detections.
    async fn count_detections(&self) -> Result<usize, DatabaseError>;

    /// Detections in `sector` at or after `since`.
    async fn count_recent_in_sector(
        &self,
        sector: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DatabaseError>;

    // ── Dead letters ────────────────────────────────────────────────

    /// Persist a dropped message.
    async fn record_dead_letter(&self, letter: &DeadLetter) -> Result<(), DatabaseError>;

    /// Most recent dead letters first, up to `limit`.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, DatabaseError>;
}
