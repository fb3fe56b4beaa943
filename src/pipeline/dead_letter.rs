//! Dead letters: messages a consumer gave up on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::DatabaseError;
use crate::pipeline::Stage;
use crate::store::EventStore;

/// A dropped payload and why it was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub consumer: String,
    pub stage: Stage,
    pub reason: String,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        consumer: impl Into<String>,
        stage: Stage,
        reason: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            consumer: consumer.into(),
            stage,
            reason: reason.into(),
            payload: payload.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Somewhere to put dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: &DeadLetter) -> Result<(), DatabaseError>;
}

/// Log-only sink.
#[derive(Debug, Default)]
pub struct TracingDeadLetters;

#[async_trait]
impl DeadLetterSink for TracingDeadLetters {
    async fn record(&self, letter: &DeadLetter) -> Result<(), DatabaseError> {
        info!(
            consumer = %letter.consumer,
            stage = %letter.stage,
            payload_len = letter.payload.len(),
            "Dead letter"
        );
        Ok(())
    }
}

/// Persists dead letters to the event store.
pub struct StoreDeadLetters {
    store: Arc<dyn EventStore>,
}

impl StoreDeadLetters {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeadLetterSink for StoreDeadLetters {
    async fn record(&self, letter: &DeadLetter) -> Result<(), DatabaseError> {
        self.store.record_dead_letter(letter).await
    }
}

/// Keeps dead letters in memory. Useful for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn record(&self, letter: &DeadLetter) -> Result<(), DatabaseError> {
        self.letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(letter.clone());
        Ok(())
    }
}
