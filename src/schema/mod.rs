//! Wire schemas for the three bus messages and their validation contract.
//!
//! Payloads arriving from the bus or the advice oracle are untrusted text.
//! [`Message::parse`] turns them into a typed value or a [`ValidationError`]
//! listing every offending field; [`Message::to_payload`] is its dual.
//! Validation is structural: odd-but-well-typed values (a negative
//! confidence, say) pass.

mod fields;
pub mod models;

pub use fields::FieldReader;
pub use models::{
    AlertKind, AlertMessage, DetectionEvent, FrequencyDescriptor, MitigationPriority,
    Recommendation,
};

use serde::Serialize;
use serde_json::Value;

use crate::error::{BusError, FieldIssue, IssueKind, ValidationError};

/// A message shape that can be validated from, and serialized to, JSON text.
pub trait Message: Serialize + Sized {
    /// Schema name used in validation errors and logs.
    const SCHEMA: &'static str;

    /// Read the fields of this shape. Must record an issue for every `None` it returns.
    fn read(fields: &mut FieldReader<'_, '_>) -> Option<Self>;

    /// Validate an already-decoded JSON value.
    fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let mut issues = Vec::new();
        let parsed = match value.as_object() {
            Some(obj) => Self::read(&mut FieldReader::root(obj, &mut issues)),
            None => {
                issues.push(FieldIssue {
                    path: String::new(),
                    kind: IssueKind::Malformed {
                        reason: format!(
                            "expected a JSON object, found {}",
                            fields::type_name(value)
                        ),
                    },
                });
                None
            }
        };

        match parsed {
            Some(message) if issues.is_empty() => Ok(message),
            _ => Err(ValidationError {
                schema: Self::SCHEMA,
                issues,
            }),
        }
    }

    /// Validate raw payload text.
    fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ValidationError {
            schema: Self::SCHEMA,
            issues: vec![FieldIssue {
                path: String::new(),
                kind: IssueKind::Malformed {
                    reason: e.to_string(),
                },
            }],
        })?;
        Self::from_value(&value)
    }

    /// Serialize to wire text.
    fn to_payload(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|e| BusError::Encode(e.to_string()))
    }
}
