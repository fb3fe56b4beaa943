//! Property tests: every valid message survives serialize-then-parse unchanged.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use rat_watch::schema::{
    AlertMessage, DetectionEvent, Message, MitigationPriority, Recommendation,
};

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 1970 through 2100, nanosecond precision
    (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_else(Utc::now)
    })
}

fn text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ._/-]{0,40}"
}

fn detection() -> impl Strategy<Value = DetectionEvent> {
    (
        text(),
        timestamp(),
        text(),
        text(),
        (-20_000i32..=20_000).prop_map(|n| f64::from(n) / 10_000.0),
        text(),
        any::<[i64; 4]>(),
        any::<i64>(),
        ".{0,20}",
    )
        .prop_map(
            |(id, ts, camera, sector, confidence, class, bbox, recent, time_of_day)| {
                DetectionEvent::new(id, camera, sector, confidence, bbox)
                    .with_timestamp(ts)
                    .with_class(class)
                    .with_recent_detections(recent)
                    .with_time_of_day(time_of_day)
            },
        )
}

fn priority() -> impl Strategy<Value = MitigationPriority> {
    prop_oneof![
        Just(MitigationPriority::Low),
        Just(MitigationPriority::Medium),
        Just(MitigationPriority::High),
        Just(MitigationPriority::Critical),
    ]
}

fn recommendation() -> impl Strategy<Value = Recommendation> {
    (
        text(),
        priority(),
        prop::collection::vec(text(), 1..6),
        any::<bool>(),
        prop::option::of(".{0,12}"),
    )
        .prop_map(
            |(summary, mitigation_priority, action_list, activate, frequency)| Recommendation {
                summary,
                mitigation_priority,
                action_list,
                ultrasonic_activation_required: activate,
                ultrasonic_frequency_khz: frequency,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn detection_event_round_trips(event in detection()) {
        let payload = event.to_payload().unwrap();
        prop_assert_eq!(DetectionEvent::parse(&payload).unwrap(), event);
    }

    #[test]
    fn recommendation_round_trips(rec in recommendation()) {
        let payload = rec.to_payload().unwrap();
        prop_assert_eq!(Recommendation::parse(&payload).unwrap(), rec);
    }

    #[test]
    fn alert_message_round_trips(event in detection(), rec in recommendation()) {
        let alert = AlertMessage::full(event, rec);
        let payload = alert.to_payload().unwrap();
        prop_assert_eq!(AlertMessage::parse(&payload).unwrap(), alert);
    }
}
