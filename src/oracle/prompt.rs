//! Prompt construction and reply extraction for the advice oracle.

use chrono::{DateTime, Utc};

use crate::schema::DetectionEvent;

/// System preamble sent with every advice request.
pub const SYSTEM_PROMPT: &str = "You are a specialized pest mitigation expert for large industrial warehouses. \
     You analyze real-time rat detection data and produce actionable mitigation recommendations.\n\n\
     Respond with ONLY a JSON object, no markdown or commentary:\n\
     {\"summary\": \"...\", \"mitigation_priority\": \"Low|Medium|High|Critical\", \
     \"action_list\": [\"...\"], \"ultrasonic_activation_required\": true, \
     \"ultrasonic_frequency_khz\": \"...\"}\n\n\
     Reference frequencies by species:\n\
     - Rattus rattus (roof rat): 20-40 kHz\n\
     - Bandicota bengalensis (Indian bandicoot): 30-50 kHz";

/// Species assumed when the detector gives no finer classification.
pub const ASSUMED_SPECIES: &str = "Bandicota bengalensis (Indian bandicoot)";

/// Frequency range matching [`ASSUMED_SPECIES`].
pub const ASSUMED_FREQUENCY: &str = "30-50 kHz";

/// The context the oracle sees for one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvicePrompt {
    pub warehouse_sector: String,
    pub recent_detections_24h: i64,
    pub time_of_day_category: String,
    pub detected_at: DateTime<Utc>,
}

impl AdvicePrompt {
    pub fn new(
        warehouse_sector: impl Into<String>,
        recent_detections_24h: i64,
        time_of_day_category: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            warehouse_sector: warehouse_sector.into(),
            recent_detections_24h,
            time_of_day_category: time_of_day_category.into(),
            detected_at,
        }
    }

    pub fn for_event(event: &DetectionEvent) -> Self {
        Self::new(
            event.warehouse_sector.clone(),
            event.recent_detections_24h,
            event.time_of_day_category.clone(),
            event.timestamp,
        )
    }

    /// Render the user turn.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::with_capacity(768);

        prompt.push_str(
            "A new rat detection event has occurred. Analyze the context and provide \
             immediate, tailored mitigation advice.\n\n",
        );
        prompt.push_str("Detection event details:\n");
        prompt.push_str(&format!("- Timestamp: {}\n", self.detected_at.to_rfc3339()));
        prompt.push_str(&format!("- Location: {}\n", self.warehouse_sector));
        prompt.push_str(&format!(
            "- Recent detections (last 24h in this sector): {}\n",
            self.recent_detections_24h
        ));
        prompt.push_str(&format!(
            "- Time of day category: {}\n",
            self.time_of_day_category
        ));
        prompt.push_str(&format!("- Detected species (assume): {ASSUMED_SPECIES}\n\n"));

        prompt.push_str("Instructions:\n");
        prompt.push_str(
            "1. Set 'mitigation_priority' (Low, Medium, High or Critical) from the location and detection frequency.\n",
        );
        prompt.push_str("2. Provide at least three concrete, actionable 'action_list' items.\n");
        prompt.push_str(
            "3. Set 'ultrasonic_activation_required' to true if activation is appropriate.\n",
        );
        prompt.push_str(&format!(
            "4. Set 'ultrasonic_frequency_khz' from the assumed species range: {ASSUMED_FREQUENCY}.\n"
        ));

        prompt
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed;
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_carries_event_context() {
        let event = DetectionEvent::new("e1", "CAM", "Sector 2 - Near Entry", 0.9, [0, 0, 1, 1])
            .with_recent_detections(5)
            .with_time_of_day("Night/Peak");
        let prompt = AdvicePrompt::for_event(&event).user_prompt();
        assert!(prompt.contains("Sector 2 - Near Entry"));
        assert!(prompt.contains("last 24h in this sector): 5"));
        assert!(prompt.contains("Night/Peak"));
        assert!(prompt.contains(ASSUMED_FREQUENCY));
    }

    #[test]
    fn system_prompt_lists_reply_fields() {
        for field in [
            "summary",
            "mitigation_priority",
            "action_list",
            "ultrasonic_activation_required",
            "ultrasonic_frequency_khz",
        ] {
            assert!(SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"summary": "x"}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_markdown_block() {
        let input = "```json\n{\"summary\": \"x\"}\n```";
        assert_eq!(extract_json_object(input), "{\"summary\": \"x\"}");
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Here you go: {\"summary\": \"x\"} hope it helps";
        assert_eq!(extract_json_object(input), "{\"summary\": \"x\"}");
    }

    #[test]
    fn extract_json_passes_through_non_json() {
        assert_eq!(extract_json_object("  no json here "), "no json here");
    }
}
