//! Field-by-field reader over an untrusted JSON object.
//!
//! Every accessor records a [`FieldIssue`] instead of returning early, so a
//! single pass reports all missing and mistyped fields together.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{FieldIssue, IssueKind};

/// JSON type label used in type-mismatch issues.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads typed fields out of one JSON object, collecting issues as it goes.
pub struct FieldReader<'a, 'b> {
    obj: &'a Map<String, Value>,
    prefix: String,
    issues: &'b mut Vec<FieldIssue>,
}

impl<'a, 'b> FieldReader<'a, 'b> {
    pub(crate) fn root(obj: &'a Map<String, Value>, issues: &'b mut Vec<FieldIssue>) -> Self {
        Self {
            obj,
            prefix: String::new(),
            issues,
        }
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn push(&mut self, path: String, kind: IssueKind) {
        self.issues.push(FieldIssue { path, kind });
    }

    fn missing(&mut self, name: &str) {
        let path = self.path(name);
        self.push(path, IssueKind::Missing);
    }

    fn wrong_type(&mut self, name: &str, expected: &'static str, found: &Value) {
        let path = self.path(name);
        self.push(
            path,
            IssueKind::WrongType {
                expected,
                found: type_name(found),
            },
        );
    }

    fn invalid(&mut self, name: &str, reason: impl Into<String>) {
        let path = self.path(name);
        self.push(
            path,
            IssueKind::Invalid {
                reason: reason.into(),
            },
        );
    }

    /// A required string. Empty strings are accepted.
    pub fn required_str(&mut self, name: &str) -> Option<String> {
        let obj = self.obj;
        match obj.get(name) {
            None => {
                self.missing(name);
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.wrong_type(name, "string", other);
                None
            }
        }
    }

    /// A required string that must contain non-whitespace text.
    pub fn non_empty_str(&mut self, name: &str) -> Option<String> {
        let value = self.required_str(name)?;
        if value.trim().is_empty() {
            self.invalid(name, "must not be empty");
            return None;
        }
        Some(value)
    }

    /// A string with a default when absent.
    pub fn str_or(&mut self, name: &str, default: &str) -> Option<String> {
        let obj = self.obj;
        match obj.get(name) {
            None => Some(default.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.wrong_type(name, "string", other);
                None
            }
        }
    }

    /// An optional string; absent and `null` both read as `None`.
    pub fn optional_str(&mut self, name: &str) -> Option<Option<String>> {
        let obj = self.obj;
        match obj.get(name) {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(s)) => Some(Some(s.clone())),
            Some(other) => {
                self.wrong_type(name, "string or null", other);
                None
            }
        }
    }

    /// A required number of any sign or magnitude.
    pub fn required_f64(&mut self, name: &str) -> Option<f64> {
        let obj = self.obj;
        match obj.get(name) {
            None => {
                self.missing(name);
                None
            }
            Some(Value::Number(n)) => n.as_f64(),
            Some(other) => {
                self.wrong_type(name, "number", other);
                None
            }
        }
    }

    /// An integer of any sign with a default when absent.
    pub fn i64_or(&mut self, name: &str, default: i64) -> Option<i64> {
        let obj = self.obj;
        match obj.get(name) {
            None => Some(default),
            Some(value @ Value::Number(n)) if n.is_f64() => {
                self.wrong_type(name, "integer", value);
                None
            }
            Some(Value::Number(n)) => match n.as_i64() {
                Some(v) => Some(v),
                None => {
                    self.invalid(name, format!("integer {n} out of range"));
                    None
                }
            },
            Some(other) => {
                self.wrong_type(name, "integer", other);
                None
            }
        }
    }

    /// A boolean with a default when absent.
    pub fn bool_or(&mut self, name: &str, default: bool) -> Option<bool> {
        let obj = self.obj;
        match obj.get(name) {
            None => Some(default),
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                self.wrong_type(name, "boolean", other);
                None
            }
        }
    }

    /// A required array of exactly `N` integers.
    pub fn int_array<const N: usize>(&mut self, name: &str) -> Option<[i64; N]> {
        let obj = self.obj;
        let items = match obj.get(name) {
            None => {
                self.missing(name);
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.wrong_type(name, "array", other);
                return None;
            }
        };

        if items.len() != N {
            self.invalid(
                name,
                format!("expected exactly {N} elements, found {}", items.len()),
            );
            return None;
        }

        let mut out = [0i64; N];
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match item.as_i64() {
                Some(v) => out[i] = v,
                None => {
                    ok = false;
                    self.wrong_type(&format!("{name}[{i}]"), "integer", item);
                }
            }
        }
        ok.then_some(out)
    }

    /// A required array of strings with at least `min_len` items.
    pub fn string_list(&mut self, name: &str, min_len: usize) -> Option<Vec<String>> {
        let obj = self.obj;
        let items = match obj.get(name) {
            None => {
                self.missing(name);
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.wrong_type(name, "array", other);
                return None;
            }
        };

        let mut out = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::String(s) => out.push(s.clone()),
                other => {
                    ok = false;
                    self.wrong_type(&format!("{name}[{i}]"), "string", other);
                }
            }
        }

        if items.len() < min_len {
            self.invalid(
                name,
                format!("expected at least {min_len} item(s), found {}", items.len()),
            );
            return None;
        }
        ok.then_some(out)
    }

    /// A UTC timestamp, defaulting to now when absent.
    ///
    /// Accepts RFC 3339 and offset-less ISO 8601 (read as UTC).
    pub fn timestamp_or_now(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let obj = self.obj;
        match obj.get(name) {
            None => Some(Utc::now()),
            Some(Value::String(s)) => match parse_timestamp(s) {
                Some(ts) => Some(ts),
                None => {
                    self.invalid(name, format!("not an ISO 8601 timestamp: {s:?}"));
                    None
                }
            },
            Some(other) => {
                self.wrong_type(name, "string", other);
                None
            }
        }
    }

    /// A required nested object, read with a reader scoped under `name`.
    pub fn object(&mut self, name: &str) -> Option<FieldReader<'a, '_>> {
        let obj = self.obj;
        match obj.get(name) {
            None => {
                self.missing(name);
                None
            }
            Some(Value::Object(child)) => {
                let prefix = self.path(name);
                Some(FieldReader {
                    obj: child,
                    prefix,
                    issues: &mut *self.issues,
                })
            }
            Some(other) => {
                self.wrong_type(name, "object", other);
                None
            }
        }
    }

    /// Record a domain-level rejection for a field that was read successfully.
    pub fn reject(&mut self, name: &str, reason: impl Into<String>) {
        self.invalid(name, reason);
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}
