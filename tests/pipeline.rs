//! End-to-end tests for the detection → recommendation → alert pipeline.
//!
//! Each test wires the real consumers to an in-process bus, an in-memory
//! store and stub collaborators, then drives them by publishing payloads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use rat_watch::bus::{LocalBus, MessageBus, Subscription};
use rat_watch::error::{DatabaseError, OracleError, SinkError};
use rat_watch::notify::{Actuator, SmsSink};
use rat_watch::oracle::{AdviceOracle, AdvicePrompt};
use rat_watch::pipeline::{
    AlertConsumer, Consumer, DeadLetter, LoggingConsumer, MemoryDeadLetters,
    RecommendationConsumer, Stage, spawn_consumers,
};
use rat_watch::resilience::{CallPolicy, RetryPolicy};
use rat_watch::schema::{AlertMessage, DetectionEvent, FrequencyDescriptor, Message};
use rat_watch::store::{EventStore, LibSqlStore};

/// Maximum time any wait is allowed before we consider the test hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const DETECTIONS: &str = "rat_detections";
const ALERTS: &str = "rat_alerts";

const HIGH_WITH_ACTIVATION: &str = r#"{"summary": "Rat activity near stored goods.",
    "mitigation_priority": "High", "action_list": ["Inspect traps"],
    "ultrasonic_activation_required": true, "ultrasonic_frequency_khz": "30-50 kHz"}"#;

const MISSING_PRIORITY: &str = r#"{"summary": "Rat activity.", "action_list": ["Inspect traps"],
    "ultrasonic_activation_required": true, "ultrasonic_frequency_khz": "30-50 kHz"}"#;

// ── Stubs ───────────────────────────────────────────────────────────

/// Stub oracle returning a fixed reply (no real API calls).
struct StubOracle {
    reply: &'static str,
}

#[async_trait]
impl AdviceOracle for StubOracle {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn query(&self, _prompt: &AdvicePrompt) -> Result<String, OracleError> {
        Ok(self.reply.to_string())
    }
}

#[derive(Default)]
struct RecordingSms {
    fail: bool,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SmsSink for RecordingSms {
    async fn send(&self, _destination: &str, body: &str) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(body.to_string());
        if self.fail {
            return Err(SinkError::SendFailed {
                sink: "sms".into(),
                reason: "gateway unreachable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingActuator {
    activations: Mutex<Vec<FrequencyDescriptor>>,
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn activate(&self, frequency: &FrequencyDescriptor) -> Result<(), SinkError> {
        self.activations.lock().unwrap().push(frequency.clone());
        Ok(())
    }
}

/// Store whose every write fails.
struct BrokenStore;

#[async_trait]
impl EventStore for BrokenStore {
    async fn upsert_detection(&self, _event: &DetectionEvent) -> Result<(), DatabaseError> {
        Err(DatabaseError::Migration("disk gone".into()))
    }
    async fn get_detection(&self, _id: &str) -> Result<Option<DetectionEvent>, DatabaseError> {
        Ok(None)
    }
    async fn count_detections(&self) -> Result<usize, DatabaseError> {
        Ok(0)
    }
    async fn count_recent_in_sector(
        &self,
        _sector: &str,
        _since: DateTime<Utc>,
    ) -> Result<u32, DatabaseError> {
        Ok(0)
    }
    async fn record_dead_letter(&self, _letter: &DeadLetter) -> Result<(), DatabaseError> {
        Ok(())
    }
    async fn list_dead_letters(&self, _limit: usize) -> Result<Vec<DeadLetter>, DatabaseError> {
        Ok(Vec::new())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Pipeline {
    bus: Arc<LocalBus>,
    sms: Arc<RecordingSms>,
    actuator: Arc<RecordingActuator>,
    letters: Arc<MemoryDeadLetters>,
    /// Independent observer of the alerts channel.
    alerts_tap: Subscription,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    async fn start(reply: &'static str, store: Arc<dyn EventStore>) -> Self {
        Self::start_with_sms(reply, store, Arc::new(RecordingSms::default())).await
    }

    async fn start_with_sms(
        reply: &'static str,
        store: Arc<dyn EventStore>,
        sms: Arc<RecordingSms>,
    ) -> Self {
        let bus = Arc::new(LocalBus::default());
        let actuator = Arc::new(RecordingActuator::default());
        let letters = Arc::new(MemoryDeadLetters::default());
        let shutdown = CancellationToken::new();
        let policy = CallPolicy::once(Duration::from_secs(1));
        let alerts_tap = bus.subscribe(ALERTS).await.unwrap();

        let consumers: Vec<Arc<dyn Consumer>> = vec![
            Arc::new(RecommendationConsumer::new(
                bus.clone(),
                Arc::new(StubOracle { reply }),
                DETECTIONS,
                ALERTS,
                &policy,
            )),
            Arc::new(LoggingConsumer::new(store, DETECTIONS, &policy)),
            Arc::new(AlertConsumer::new(
                sms.clone(),
                actuator.clone(),
                "+15550002",
                ALERTS,
                &policy,
                &policy,
            )),
        ];

        let handles = spawn_consumers(
            bus.as_ref(),
            consumers,
            letters.clone(),
            &shutdown,
            &RetryPolicy::none(),
            &policy,
        )
        .await
        .unwrap();

        Self {
            bus,
            sms,
            actuator,
            letters,
            alerts_tap,
            shutdown,
            handles,
        }
    }

    async fn publish(&self, event: &DetectionEvent) {
        self.bus
            .publish(DETECTIONS, event.to_payload().unwrap())
            .await
            .unwrap();
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
        }
    }
}

/// Poll `check` until it holds or the test timeout expires.
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn scenario_event() -> DetectionEvent {
    DetectionEvent::new("e1", "CAM_A_SECTOR_1", "Sector 1", 0.9, [10, 10, 50, 50])
        .with_recent_detections(3)
        .with_time_of_day("Night")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn detection_produces_one_full_alert_sms_and_activation() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let mut pipeline = Pipeline::start(HIGH_WITH_ACTIVATION, store.clone()).await;

    pipeline.publish(&scenario_event()).await;

    let raw = timeout(TEST_TIMEOUT, pipeline.alerts_tap.recv())
        .await
        .expect("no alert published")
        .unwrap();
    let alert = AlertMessage::parse(&raw).unwrap();
    assert_eq!(alert.message_type.as_str(), "FULL_ALERT");
    assert_eq!(alert.event, scenario_event().with_timestamp(alert.event.timestamp));
    assert!(
        timeout(Duration::from_millis(100), pipeline.alerts_tap.recv())
            .await
            .is_err(),
        "exactly one alert expected"
    );

    let sms = pipeline.sms.clone();
    eventually(|| sms.sent.lock().unwrap().len() == 1).await;
    let body = sms.sent.lock().unwrap()[0].clone();
    assert!(body.contains("Sector 1"));
    assert!(body.contains("Priority: High"));
    assert!(body.contains("Action 1: Inspect traps"));

    let actuator = pipeline.actuator.clone();
    eventually(|| !actuator.activations.lock().unwrap().is_empty()).await;
    assert_eq!(
        *actuator.activations.lock().unwrap(),
        vec![FrequencyDescriptor::Known("30-50 kHz".into())]
    );

    timeout(TEST_TIMEOUT, async {
        while store.count_detections().await.unwrap() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("detection never persisted");
    assert!(pipeline.letters.snapshot().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn reply_missing_priority_publishes_nothing() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let mut pipeline = Pipeline::start(MISSING_PRIORITY, store).await;

    pipeline.publish(&scenario_event()).await;

    let letters = pipeline.letters.clone();
    eventually(|| !letters.snapshot().is_empty()).await;
    let recorded = letters.snapshot();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].consumer, "recommendation");
    assert_eq!(recorded[0].stage, Stage::RecommendationValidated);
    assert!(recorded[0].reason.contains("mitigation_priority"));

    assert!(
        timeout(Duration::from_millis(200), pipeline.alerts_tap.recv())
            .await
            .is_err(),
        "no alert expected"
    );
    assert!(pipeline.sms.sent.lock().unwrap().is_empty());
    assert!(pipeline.actuator.activations.lock().unwrap().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn persistence_failure_does_not_suppress_alert() {
    let mut pipeline = Pipeline::start(HIGH_WITH_ACTIVATION, Arc::new(BrokenStore)).await;

    pipeline.publish(&scenario_event()).await;

    let raw = timeout(TEST_TIMEOUT, pipeline.alerts_tap.recv())
        .await
        .expect("alert suppressed by logging failure")
        .unwrap();
    assert_eq!(AlertMessage::parse(&raw).unwrap().event.event_id, "e1");

    let letters = pipeline.letters.clone();
    eventually(|| {
        letters
            .snapshot()
            .iter()
            .any(|l| l.consumer == "logging" && l.stage == Stage::Persisted)
    })
    .await;

    let sms = pipeline.sms.clone();
    eventually(|| sms.sent.lock().unwrap().len() == 1).await;

    pipeline.stop().await;
}

#[tokio::test]
async fn duplicate_event_ids_keep_latest_row() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let pipeline = Pipeline::start(HIGH_WITH_ACTIVATION, store.clone()).await;

    let first = scenario_event();
    let mut second = scenario_event();
    second.confidence = 0.55;
    pipeline.publish(&first).await;
    pipeline.publish(&second).await;

    timeout(TEST_TIMEOUT, async {
        loop {
            if let Ok(Some(row)) = store.get_detection("e1").await
                && (row.confidence - 0.55).abs() < f64::EPSILON
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second write never landed");

    assert_eq!(store.count_detections().await.unwrap(), 1);
    pipeline.stop().await;
}

#[tokio::test]
async fn malformed_detection_is_dropped_by_both_detection_consumers() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let pipeline = Pipeline::start(HIGH_WITH_ACTIVATION, store.clone()).await;

    pipeline
        .bus
        .publish(DETECTIONS, r#"{"event_id": "x", "bbox": "wide"}"#.into())
        .await
        .unwrap();

    let letters = pipeline.letters.clone();
    eventually(|| letters.snapshot().len() == 2).await;
    assert!(
        letters
            .snapshot()
            .iter()
            .all(|l| l.stage == Stage::Validated)
    );
    assert_eq!(store.count_detections().await.unwrap(), 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn failed_sms_is_dead_lettered_and_actuator_still_runs() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let sms = Arc::new(RecordingSms {
        fail: true,
        ..Default::default()
    });
    let pipeline = Pipeline::start_with_sms(HIGH_WITH_ACTIVATION, store, sms).await;

    pipeline.publish(&scenario_event()).await;

    let letters = pipeline.letters.clone();
    eventually(|| letters.snapshot().iter().any(|l| l.consumer == "alert")).await;
    let alert_letters: Vec<_> = letters
        .snapshot()
        .into_iter()
        .filter(|l| l.consumer == "alert")
        .collect();
    assert_eq!(alert_letters.len(), 1);
    assert_eq!(alert_letters[0].stage, Stage::Notified);
    assert!(alert_letters[0].reason.contains("gateway unreachable"));
    assert!(AlertMessage::parse(&alert_letters[0].payload).is_ok());

    assert_eq!(pipeline.actuator.activations.lock().unwrap().len(), 1);

    pipeline.stop().await;
}
