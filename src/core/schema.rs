//! Structural payload contracts checked before a handler runs.
//!
//! A [`Schema`] lists fields with a primitive type and an optional format
//! constraint. [`validate`] checks every field and reports every violation,
//! not just the first. Fields a schema does not mention are passed through.

use std::fmt;

use chrono::DateTime;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Primitive JSON type a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// Any JSON value other than null
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => !value.is_null(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Format constraint applied after the type check passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Absolute http(s) URL with a host
    Url,
    /// String with at least one non-whitespace character
    NonEmpty,
    /// RFC 3339 date-time string
    DateTime,
}

impl Format {
    fn check(&self, value: &Value) -> Result<(), String> {
        let Some(text) = value.as_str() else {
            return Err(format!("{:?} format applies to strings only", self));
        };

        match self {
            Self::Url => {
                let url = Url::parse(text).map_err(|e| e.to_string())?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(format!("unsupported scheme '{}'", url.scheme()));
                }
                if url.host_str().map_or(true, str::is_empty) {
                    return Err("missing host".to_string());
                }
                Ok(())
            }
            Self::NonEmpty => {
                if text.trim().is_empty() {
                    Err("must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Self::DateTime => DateTime::parse_from_rfc3339(text)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}

/// Contract for a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub format: Option<Format>,
}

/// Structural contract for a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Name used in diagnostics (usually the input type name)
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Schema that accepts any JSON object
    pub fn any_object(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Add a required field
    pub fn required(self, name: &str, field_type: FieldType) -> Self {
        self.field(name, field_type, true, None)
    }

    /// Add a required field with a format constraint
    pub fn required_with(self, name: &str, field_type: FieldType, format: Format) -> Self {
        self.field(name, field_type, true, Some(format))
    }

    /// Add an optional field (checked only when present and non-null)
    pub fn optional(self, name: &str, field_type: FieldType) -> Self {
        self.field(name, field_type, false, None)
    }

    fn field(
        mut self,
        name: &str,
        field_type: FieldType,
        required: bool,
        format: Option<Format>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            required,
            format,
        });
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// What went wrong with one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ViolationKind {
    Missing,
    WrongType { expected: FieldType, found: String },
    InvalidFormat { format: Format, reason: String },
    /// Passed the structural checks but could not be decoded into the
    /// step's input type
    Decode { reason: String },
}

/// A single violated field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Field name, or `$` for the payload itself
    pub field: String,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Missing => write!(f, "{}: missing", self.field),
            ViolationKind::WrongType { expected, found } => {
                write!(f, "{}: expected {}, found {}", self.field, expected, found)
            }
            ViolationKind::InvalidFormat { format, reason } => {
                write!(f, "{}: invalid {:?} ({})", self.field, format, reason)
            }
            ViolationKind::Decode { reason } => write!(f, "{}: {}", self.field, reason),
        }
    }
}

/// Every violation found while checking a payload
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("payload does not match {schema}: {}", render(.violations))]
pub struct ValidationError {
    pub schema: String,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Names of every offending field, in schema order
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }

    pub(crate) fn decode(schema: &str, reason: impl Into<String>) -> Self {
        Self {
            schema: schema.to_string(),
            violations: vec![Violation {
                field: "$".to_string(),
                kind: ViolationKind::Decode {
                    reason: reason.into(),
                },
            }],
        }
    }
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A payload that satisfied its schema
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPayload(Value);

impl ValidPayload {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

/// Check `payload` against `schema`.
///
/// Pure: the payload is returned unchanged on success.
pub fn validate(schema: &Schema, payload: &Value) -> Result<ValidPayload, ValidationError> {
    let Some(object) = payload.as_object() else {
        return Err(ValidationError {
            schema: schema.name.clone(),
            violations: vec![Violation {
                field: "$".to_string(),
                kind: ViolationKind::WrongType {
                    expected: FieldType::Object,
                    found: type_name(payload),
                },
            }],
        });
    };

    let mut violations = Vec::new();

    for spec in &schema.fields {
        let value = match object.get(&spec.name) {
            None | Some(Value::Null) if spec.required => {
                violations.push(Violation {
                    field: spec.name.clone(),
                    kind: ViolationKind::Missing,
                });
                continue;
            }
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };

        if !spec.field_type.matches(value) {
            violations.push(Violation {
                field: spec.name.clone(),
                kind: ViolationKind::WrongType {
                    expected: spec.field_type,
                    found: type_name(value),
                },
            });
            continue;
        }

        if let Some(format) = spec.format {
            if let Err(reason) = format.check(value) {
                violations.push(Violation {
                    field: spec.name.clone(),
                    kind: ViolationKind::InvalidFormat { format, reason },
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(ValidPayload(payload.clone()))
    } else {
        Err(ValidationError {
            schema: schema.name.clone(),
            violations,
        })
    }
}
