use std::sync::Arc;

use rat_watch::bus::{LocalBus, MessageBus};
use rat_watch::config::PipelineConfig;
use rat_watch::notify::{Actuator, HttpActuator, LogActuator, TwilioSms};
use rat_watch::oracle::{AdviceOracle, UnavailableOracle, create_oracle};
use rat_watch::pipeline::{
    AlertConsumer, Consumer, DeadLetterSink, LoggingConsumer, RecommendationConsumer,
    StoreDeadLetters, spawn_consumers,
};
use rat_watch::source::{DetectionSource, JsonLinesPredictions};
use rat_watch::store::{EventStore, LibSqlStore};
use rat_watch::telemetry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TWILIO_ACCOUNT_SID=... TWILIO_AUTH_TOKEN=... TWILIO_FROM_NUMBER=... TWILIO_TO_NUMBER=...");
        std::process::exit(1);
    });

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let log_guard = telemetry::init(&config.log, &config.service_name);

    eprintln!("🐀 {} v{} ({})", config.service_name, env!("CARGO_PKG_VERSION"), config.environment);
    eprintln!("   Detections: {}", config.bus.detections_channel);
    eprintln!("   Alerts: {}", config.bus.alerts_channel);

    // ── Store ────────────────────────────────────────────────────────────
    let store: Arc<dyn EventStore> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {e}", config.db_path.display());
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── External collaborators ───────────────────────────────────────────
    let oracle: Arc<dyn AdviceOracle> = match &config.llm {
        Some(llm) => match create_oracle(llm) {
            Ok(oracle) => oracle,
            Err(e) => {
                tracing::error!(error = %e, "Advice oracle setup failed");
                Arc::new(UnavailableOracle::new(e.to_string()))
            }
        },
        None => Arc::new(UnavailableOracle::new("no API key configured")),
    };
    eprintln!("   Oracle: {}", oracle.model_name());

    let sms = Arc::new(TwilioSms::new(config.sms.clone()));
    let actuator: Arc<dyn Actuator> = match &config.actuator_url {
        Some(url) => {
            eprintln!("   Actuator: {url}");
            Arc::new(HttpActuator::new(url.clone()))
        }
        None => {
            eprintln!("   Actuator: log only");
            Arc::new(LogActuator)
        }
    };

    // ── Bus and consumers ────────────────────────────────────────────────
    let local_bus = Arc::new(LocalBus::new(config.bus.capacity));
    let bus: Arc<dyn MessageBus> = local_bus.clone();
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(StoreDeadLetters::new(store.clone()));
    let shutdown = CancellationToken::new();

    let consumers: Vec<Arc<dyn Consumer>> = vec![
        Arc::new(RecommendationConsumer::new(
            bus.clone(),
            oracle,
            &config.bus.detections_channel,
            &config.bus.alerts_channel,
            &config.calls.oracle,
        )),
        Arc::new(LoggingConsumer::new(
            store.clone(),
            &config.bus.detections_channel,
            &config.calls.store,
        )),
        Arc::new(AlertConsumer::new(
            sms,
            actuator,
            &config.sms.to_number,
            &config.bus.alerts_channel,
            &config.calls.sms,
            &config.calls.actuator,
        )),
    ];

    let handles = spawn_consumers(
        bus.as_ref(),
        consumers,
        dead_letters,
        &shutdown,
        &config.calls.subscribe,
        &config.calls.store,
    )
    .await
    .unwrap_or_else(|e| {
        eprintln!("Error: consumers could not subscribe: {e}");
        std::process::exit(1);
    });

    // ── Detector input ───────────────────────────────────────────────────
    let source = DetectionSource::new(config.source.clone(), bus.clone(), &config.bus.detections_channel)
        .with_store(store.clone());
    let source_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let input = JsonLinesPredictions::new(tokio::io::BufReader::new(tokio::io::stdin()));
        match source.run(input, source_shutdown).await {
            Ok(published) => tracing::info!(published, "Detector input finished"),
            Err(e) => tracing::error!(error = %e, "Detector input failed"),
        }
    });

    eprintln!("   Reading detector output from stdin. Ctrl-C to stop.\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();
    local_bus.close().await;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Consumer ended abnormally");
        }
    }

    // A pending stdin read cannot be cancelled and would hold the runtime open.
    drop(log_guard);
    std::process::exit(0)
}
