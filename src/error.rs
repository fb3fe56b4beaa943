//! Error types for the detection pipeline.

use std::fmt;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    #[error("External call error: {0}")]
    External(#[from] ExternalCallError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Missing or malformed startup configuration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// ── Validation ──────────────────────────────────────────────────────

/// What went wrong with a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// Required field absent.
    Missing,
    /// Present with the wrong JSON type.
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    /// Right type, but the value is not acceptable (empty list, unknown enum label, ...).
    Invalid { reason: String },
    /// The payload itself is not a JSON object.
    Malformed { reason: String },
}

/// One offending field in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path, e.g. `recommendation.action_list` or `bbox[2]`. Empty for the root.
    pub path: String,
    pub kind: IssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() {
            "<root>"
        } else {
            self.path.as_str()
        };
        match &self.kind {
            IssueKind::Missing => write!(f, "{path}: field required"),
            IssueKind::WrongType { expected, found } => {
                write!(f, "{path}: expected {expected}, found {found}")
            }
            IssueKind::Invalid { reason } => write!(f, "{path}: {reason}"),
            IssueKind::Malformed { reason } => write!(f, "{path}: malformed payload ({reason})"),
        }
    }
}

/// A payload failed structural validation against one of the message schemas.
///
/// Carries every issue found, not just the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub schema: &'static str,
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Paths of all offending fields.
    pub fn paths(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.path.as_str()).collect()
    }

    /// Whether `path` is among the offending fields.
    pub fn mentions(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validation failed with {} issue(s): ",
            self.schema,
            self.issues.len()
        )?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

// ── Transport ───────────────────────────────────────────────────────

/// Message bus failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Channel {channel} is closed")]
    Closed { channel: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

// ── External collaborators ──────────────────────────────────────────

/// Advice oracle (LLM) failures.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Oracle unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// SMS gateway and actuator failures.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink {sink} send failed: {reason}")]
    SendFailed { sink: String, reason: String },

    #[error("Sink {sink} rejected request with status {status}: {body}")]
    Rejected {
        sink: String,
        status: u16,
        body: String,
    },

    #[error("Sink {sink} is not configured")]
    NotConfigured { sink: String },
}

/// Any failed call to an external collaborator, including guard-level failures.
#[derive(Debug, thiserror::Error)]
pub enum ExternalCallError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Call {call} timed out after {after:?}")]
    Timeout { call: String, after: Duration },

    #[error("Circuit open for {call}, call rejected")]
    CircuitOpen { call: String },
}

impl ExternalCallError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Oracle(OracleError::RequestFailed { .. }) => true,
            Self::Oracle(_) => false,
            Self::Database(DatabaseError::Query(_) | DatabaseError::Pool(_)) => true,
            Self::Database(_) => false,
            Self::Sink(SinkError::SendFailed { .. }) => true,
            Self::Sink(SinkError::Rejected { status, .. }) => *status == 429 || *status >= 500,
            Self::Sink(SinkError::NotConfigured { .. }) => false,
            Self::CircuitOpen { .. } => false,
        }
    }
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
