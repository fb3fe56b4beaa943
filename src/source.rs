//! Detection source adapter: turns object-detector output into
//! `DetectionEvent`s on the detections channel.
//!
//! The detector reports centre-format boxes, one JSON batch per line:
//! `{"predictions": [{"class": "rat", "confidence": 0.91, "x": 120, "y": 80, "width": 40, "height": 22}]}`.
//! Only the first prediction of the target class above the confidence floor
//! becomes an event.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::error::BusError;
use crate::schema::{DetectionEvent, Message};
use crate::store::EventStore;

/// One detector hit, box given by centre and size.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Prediction {
    /// Corner box `[x1, y1, x2, y2]`, truncated toward zero.
    pub fn corners(&self) -> [i64; 4] {
        let (half_w, half_h) = (self.width / 2.0, self.height / 2.0);
        [
            (self.x - half_w) as i64,
            (self.y - half_h) as i64,
            (self.x + half_w) as i64,
            (self.y + half_h) as i64,
        ]
    }
}

/// One line of detector output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionBatch {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

/// Static facts about the camera this source reads.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub camera_id: String,
    pub warehouse_sector: String,
    pub time_of_day_category: String,
    /// Detector class that counts as a hit, compared case-insensitively.
    pub target_class: String,
    pub min_confidence: f64,
}

// ── Reader ──────────────────────────────────────────────────────────

/// Reads newline-delimited prediction batches from any async reader.
pub struct JsonLinesPredictions<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> JsonLinesPredictions<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next parseable batch. Blank and malformed lines are skipped.
    /// `Ok(None)` at end of input.
    pub async fn next_batch(&mut self) -> std::io::Result<Option<PredictionBatch>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<PredictionBatch>(line) {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) => warn!(line = self.line_no, error = %e, "Skipping malformed detector output"),
            }
        }
        Ok(None)
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

pub struct DetectionSource {
    config: SourceConfig,
    bus: Arc<dyn MessageBus>,
    channel: String,
    store: Option<Arc<dyn EventStore>>,
}

impl DetectionSource {
    pub fn new(config: SourceConfig, bus: Arc<dyn MessageBus>, channel: impl Into<String>) -> Self {
        Self {
            config,
            bus,
            channel: channel.into(),
            store: None,
        }
    }

    /// Use stored history to fill `recent_detections_24h`.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build an event from the first qualifying prediction, if any.
    pub async fn event_from_predictions(&self, predictions: &[Prediction]) -> Option<DetectionEvent> {
        let hit = predictions.iter().find(|p| {
            p.class.eq_ignore_ascii_case(&self.config.target_class)
                && p.confidence >= self.config.min_confidence
        })?;

        let now = Utc::now();
        let recent = match &self.store {
            Some(store) => store
                .count_recent_in_sector(&self.config.warehouse_sector, now - Duration::hours(24))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Recent detection count unavailable, using 0");
                    0
                }),
            None => 0,
        };

        Some(
            DetectionEvent::new(
                Uuid::new_v4().to_string(),
                self.config.camera_id.clone(),
                self.config.warehouse_sector.clone(),
                hit.confidence,
                hit.corners(),
            )
            .with_timestamp(now)
            .with_class(hit.class.to_lowercase())
            .with_recent_detections(i64::from(recent))
            .with_time_of_day(self.config.time_of_day_category.clone()),
        )
    }

    /// Serialize and publish to the detections channel.
    pub async fn publish(&self, event: &DetectionEvent) -> Result<usize, BusError> {
        let payload = event.to_payload()?;
        let receivers = self.bus.publish(&self.channel, payload).await?;
        info!(
            event_id = %event.event_id,
            confidence = event.confidence,
            channel = %self.channel,
            receivers,
            "Published detection"
        );
        Ok(receivers)
    }

    /// Feed batches from `input` until it ends or shutdown. Returns how many
    /// events were published.
    pub async fn run<R: AsyncBufRead + Unpin>(
        &self,
        mut input: JsonLinesPredictions<R>,
        shutdown: CancellationToken,
    ) -> std::io::Result<usize> {
        let mut published = 0;
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = input.next_batch() => match next? {
                    Some(batch) => batch,
                    None => {
                        debug!("Detector input ended");
                        break;
                    }
                },
            };

            let Some(event) = self.event_from_predictions(&batch.predictions).await else {
                continue;
            };
            match self.publish(&event).await {
                Ok(_) => published += 1,
                Err(e) => warn!(event_id = %event.event_id, error = %e, "Detection publish failed, event dropped"),
            }
        }
        Ok(published)
    }
}
