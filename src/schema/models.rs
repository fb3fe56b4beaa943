//! Detection, recommendation and alert message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{FieldReader, Message};

/// Default detected class when the producer omits it.
pub const DEFAULT_RAT_CLASS: &str = "rat";

/// Default time-of-day bucket when the producer omits it.
pub const DEFAULT_TIME_OF_DAY: &str = "Night/Off-Hours";

// ── Detection event ─────────────────────────────────────────────────

/// One observed sensor event, published to the detections channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Producer-generated unique ID. Consumers must tolerate duplicates.
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    /// Free-text location, e.g. "Sector 1 - Near Food Storage".
    pub warehouse_sector: String,
    /// Model confidence. Nominally in [0, 1], not enforced.
    pub confidence: f64,
    pub rat_class: String,
    /// `[x1, y1, x2, y2]`.
    pub bbox: [i64; 4],
    pub recent_detections_24h: i64,
    pub time_of_day_category: String,
}

impl DetectionEvent {
    /// Create an event stamped now, with default class, count and time-of-day.
    pub fn new(
        event_id: impl Into<String>,
        camera_id: impl Into<String>,
        warehouse_sector: impl Into<String>,
        confidence: f64,
        bbox: [i64; 4],
    ) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp: Utc::now(),
            camera_id: camera_id.into(),
            warehouse_sector: warehouse_sector.into(),
            confidence,
            rat_class: DEFAULT_RAT_CLASS.to_string(),
            bbox,
            recent_detections_24h: 0,
            time_of_day_category: DEFAULT_TIME_OF_DAY.to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_class(mut self, rat_class: impl Into<String>) -> Self {
        self.rat_class = rat_class.into();
        self
    }

    pub fn with_recent_detections(mut self, count: i64) -> Self {
        self.recent_detections_24h = count;
        self
    }

    pub fn with_time_of_day(mut self, category: impl Into<String>) -> Self {
        self.time_of_day_category = category.into();
        self
    }
}

impl Message for DetectionEvent {
    const SCHEMA: &'static str = "DetectionEvent";

    fn read(f: &mut FieldReader<'_, '_>) -> Option<Self> {
        let event_id = f.required_str("event_id");
        let timestamp = f.timestamp_or_now("timestamp");
        let camera_id = f.required_str("camera_id");
        let warehouse_sector = f.required_str("warehouse_sector");
        let confidence = f.required_f64("confidence");
        let rat_class = f.str_or("rat_class", DEFAULT_RAT_CLASS);
        let bbox = f.int_array::<4>("bbox");
        let recent_detections_24h = f.i64_or("recent_detections_24h", 0);
        let time_of_day_category = f.str_or("time_of_day_category", DEFAULT_TIME_OF_DAY);

        Some(Self {
            event_id: event_id?,
            timestamp: timestamp?,
            camera_id: camera_id?,
            warehouse_sector: warehouse_sector?,
            confidence: confidence?,
            rat_class: rat_class?,
            bbox: bbox?,
            recent_detections_24h: recent_detections_24h?,
            time_of_day_category: time_of_day_category?,
        })
    }
}

// ── Recommendation ──────────────────────────────────────────────────

/// How urgently a detection should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MitigationPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl MitigationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for MitigationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MitigationPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{other}', expected one of Low, Medium, High, Critical"
            )),
        }
    }
}

/// Frequency handed to the ultrasonic actuator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrequencyDescriptor {
    Known(String),
    /// Activation was requested without a frequency.
    Unknown,
}

impl fmt::Display for FrequencyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(range) => f.write_str(range),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Structured mitigation advice derived from one detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub summary: String,
    pub mitigation_priority: MitigationPriority,
    /// At least one item.
    pub action_list: Vec<String>,
    pub ultrasonic_activation_required: bool,
    /// Expected whenever activation is required, but not enforced.
    pub ultrasonic_frequency_khz: Option<String>,
}

impl Recommendation {
    pub fn first_action(&self) -> Option<&str> {
        self.action_list.first().map(String::as_str)
    }

    /// The frequency to activate at, if activation is required at all.
    pub fn activation(&self) -> Option<FrequencyDescriptor> {
        if !self.ultrasonic_activation_required {
            return None;
        }
        Some(match self.ultrasonic_frequency_khz.as_deref() {
            Some(f) if !f.trim().is_empty() => FrequencyDescriptor::Known(f.to_string()),
            _ => FrequencyDescriptor::Unknown,
        })
    }
}

impl Message for Recommendation {
    const SCHEMA: &'static str = "Recommendation";

    fn read(f: &mut FieldReader<'_, '_>) -> Option<Self> {
        let summary = f.non_empty_str("summary");
        let priority = f.non_empty_str("mitigation_priority").and_then(|raw| {
            raw.parse::<MitigationPriority>()
                .map_err(|reason| f.reject("mitigation_priority", reason))
                .ok()
        });
        let action_list = f.string_list("action_list", 1);
        let activation = f.bool_or("ultrasonic_activation_required", false);
        let frequency = f.optional_str("ultrasonic_frequency_khz");

        Some(Self {
            summary: summary?,
            mitigation_priority: priority?,
            action_list: action_list?,
            ultrasonic_activation_required: activation?,
            ultrasonic_frequency_khz: frequency?,
        })
    }
}

// ── Alert message ───────────────────────────────────────────────────

/// Discriminator for alert messages. Only full alerts exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AlertKind {
    #[default]
    #[serde(rename = "FULL_ALERT")]
    FullAlert,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullAlert => "FULL_ALERT",
        }
    }
}

/// An event and its recommendation, published to the alerts channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub event: DetectionEvent,
    pub recommendation: Recommendation,
    pub message_type: AlertKind,
}

impl AlertMessage {
    pub fn full(event: DetectionEvent, recommendation: Recommendation) -> Self {
        Self {
            event,
            recommendation,
            message_type: AlertKind::FullAlert,
        }
    }
}

impl Message for AlertMessage {
    const SCHEMA: &'static str = "AlertMessage";

    fn read(f: &mut FieldReader<'_, '_>) -> Option<Self> {
        let event = f
            .object("event")
            .and_then(|mut r| DetectionEvent::read(&mut r));
        let recommendation = f
            .object("recommendation")
            .and_then(|mut r| Recommendation::read(&mut r));
        let message_type = match f.str_or("message_type", AlertKind::FullAlert.as_str()) {
            Some(tag) if tag == AlertKind::FullAlert.as_str() => Some(AlertKind::FullAlert),
            Some(tag) => {
                f.reject("message_type", format!("unknown message type '{tag}'"));
                None
            }
            None => None,
        };

        Some(Self {
            event: event?,
            recommendation: recommendation?,
            message_type: message_type?,
        })
    }
}
