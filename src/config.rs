//! Process configuration, read once at startup from the environment.
//!
//! Missing required keys and unparseable values are [`ConfigError`]s, which
//! the binary treats as fatal.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::notify::TwilioConfig;
use crate::oracle::{LlmBackend, LlmConfig};
use crate::resilience::{CallPolicy, RetryPolicy};
use crate::source::SourceConfig;
use crate::telemetry::LogConfig;

/// Channel names and buffer size for the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub detections_channel: String,
    pub alerts_channel: String,
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            detections_channel: "rat_detections".to_string(),
            alerts_channel: "rat_alerts".to_string(),
            capacity: crate::bus::local::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Per-dependency call policies.
#[derive(Debug, Clone, Default)]
pub struct CallPolicies {
    pub oracle: CallPolicy,
    pub store: CallPolicy,
    pub sms: CallPolicy,
    pub actuator: CallPolicy,
    /// Used when a consumer first connects to its channel.
    pub subscribe: RetryPolicy,
}

/// Everything the pipeline needs to start.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub service_name: String,
    pub environment: String,
    pub log: LogConfig,
    pub bus: BusConfig,
    pub db_path: PathBuf,
    /// `None` when no API key is set; the oracle then reports itself unavailable.
    pub llm: Option<LlmConfig>,
    pub sms: TwilioConfig,
    /// `None` keeps the log-only actuator.
    pub actuator_url: Option<String>,
    pub source: SourceConfig,
    pub calls: CallPolicies,
}

impl PipelineConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let log = LogConfig {
            level: env.or("LOG_LEVEL", "info"),
            dir: env.get("LOG_DIR").map(PathBuf::from),
        };

        let bus = BusConfig {
            detections_channel: env.or("DETECTIONS_CHANNEL", "rat_detections"),
            alerts_channel: env.or("ALERTS_CHANNEL", "rat_alerts"),
            capacity: env.parse("BUS_CAPACITY", crate::bus::local::DEFAULT_CHANNEL_CAPACITY)?,
        };

        let backend: LlmBackend = env.parse("LLM_BACKEND", LlmBackend::OpenAi)?;
        let key_var = match backend {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        };
        let llm = env.get(key_var).map(|key| LlmConfig {
            backend,
            api_key: secrecy::SecretString::from(key),
            model: env.or("LLM_MODEL", backend.default_model()),
        });

        let sms = TwilioConfig {
            account_sid: env.require("TWILIO_ACCOUNT_SID")?,
            auth_token: secrecy::SecretString::from(env.require("TWILIO_AUTH_TOKEN")?),
            from_number: env.require("TWILIO_FROM_NUMBER")?,
            to_number: env.require("TWILIO_TO_NUMBER")?,
            api_base: env.or("TWILIO_API_BASE", "https://api.twilio.com"),
        };

        let source = SourceConfig {
            camera_id: env.or("CAMERA_ID", "CAM_A_SECTOR_1"),
            warehouse_sector: env.or("WAREHOUSE_SECTOR", "Sector 1 - Near Food Storage"),
            time_of_day_category: env.or(
                "TIME_OF_DAY_CATEGORY",
                crate::schema::models::DEFAULT_TIME_OF_DAY,
            ),
            target_class: env.or("TARGET_CLASS", "rat"),
            min_confidence: env.parse("MIN_CONFIDENCE", 0.25)?,
        };

        let retry = RetryPolicy::new(
            env.parse("RETRY_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(env.parse("RETRY_BASE_DELAY_MS", 200)?),
            Duration::from_millis(env.parse("RETRY_MAX_DELAY_MS", 5000)?),
        );
        let failure_threshold = env.parse("BREAKER_FAILURE_THRESHOLD", 5)?;
        let cooldown = Duration::from_secs(env.parse("BREAKER_COOLDOWN_SECS", 30)?);
        let policy = |timeout_key: &str, default_secs: u64| -> Result<CallPolicy, ConfigError> {
            Ok(CallPolicy {
                timeout: Duration::from_secs(env.parse(timeout_key, default_secs)?),
                retry: retry.clone(),
                failure_threshold,
                cooldown,
            })
        };
        let calls = CallPolicies {
            oracle: policy("ORACLE_TIMEOUT_SECS", 30)?,
            store: policy("SINK_TIMEOUT_SECS", 5)?,
            sms: policy("SMS_TIMEOUT_SECS", 10)?,
            actuator: policy("ACTUATOR_TIMEOUT_SECS", 5)?,
            subscribe: retry.clone(),
        };

        Ok(Self {
            service_name: env.or("SERVICE_NAME", "WarehouseRatMonitor"),
            environment: env.or("ENVIRONMENT", "development"),
            log,
            bus,
            db_path: PathBuf::from(env.or("DETECTIONS_DB_PATH", "./data/rat_detections.db")),
            llm,
            sms,
            actuator_url: env.get("ACTUATOR_URL"),
            source,
            calls,
        })
    }
}

/// Typed access over a string lookup. Blank values count as unset.
struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }
}
