//! Deterministic value coercion.
//!
//! Argument types are described by a [`ValueType`] tree and interpreted by
//! [`coerce_value`] — a small, reflection-free interpreter. Union arms are
//! tried in declaration order; enums accept a member value, an exact variant
//! name, or a raw value coercible to the variant value type.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Number, Value, json};

/// Failure to coerce a raw value to a target type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CoerceError(pub String);

/// Type descriptor for argument values.
#[derive(Clone)]
pub enum ValueType {
    /// Identity: the raw token is kept as a string.
    Str,
    Int,
    Float,
    Bool,
    /// Permissive datetime parse; normalized to an RFC 3339 string.
    DateTime,
    /// Value must equal one of the literals (string match).
    Literal(Vec<String>),
    /// Arms tried in declaration order; first success wins.
    Union(Vec<ValueType>),
    /// Named enum: `(variant name, variant value)` pairs.
    Enum {
        name: String,
        variants: Vec<(String, Value)>,
    },
    /// Custom coercer callable.
    Custom {
        name: String,
        parse: Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>,
    },
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Str
    }
}

impl ValueType {
    /// Short name used in error messages and help text.
    pub fn type_name(&self) -> String {
        match self {
            ValueType::Str => "str".to_string(),
            ValueType::Int => "int".to_string(),
            ValueType::Float => "float".to_string(),
            ValueType::Bool => "bool".to_string(),
            ValueType::DateTime => "datetime".to_string(),
            ValueType::Literal(options) => format!("literal[{}]", options.join(", ")),
            ValueType::Union(arms) => {
                let names: Vec<String> = arms.iter().map(ValueType::type_name).collect();
                format!("union[{}]", names.join(" | "))
            }
            ValueType::Enum { name, .. } => name.clone(),
            ValueType::Custom { name, .. } => name.clone(),
        }
    }
}

impl std::fmt::Debug for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.type_name())
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueType::Str, ValueType::Str)
            | (ValueType::Int, ValueType::Int)
            | (ValueType::Float, ValueType::Float)
            | (ValueType::Bool, ValueType::Bool)
            | (ValueType::DateTime, ValueType::DateTime) => true,
            (ValueType::Literal(a), ValueType::Literal(b)) => a == b,
            (ValueType::Union(a), ValueType::Union(b)) => a == b,
            (
                ValueType::Enum { name: a, variants: va },
                ValueType::Enum { name: b, variants: vb },
            ) => a == b && va == vb,
            (ValueType::Custom { name: a, .. }, ValueType::Custom { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Coerce `value` to `target`. Raw command-line tokens arrive as strings;
/// pre-typed values (defaults, choices) pass through when they already fit.
pub fn coerce_value(value: &Value, target: &ValueType) -> Result<Value, CoerceError> {
    match target {
        ValueType::Str => coerce_str(value),
        ValueType::Int => coerce_int(value),
        ValueType::Float => coerce_float(value),
        ValueType::Bool => coerce_bool(value),
        ValueType::DateTime => coerce_datetime(value),
        ValueType::Literal(options) => {
            let text = value_as_text(value);
            if options.iter().any(|option| option == &text) {
                Ok(Value::String(text))
            } else {
                Err(CoerceError(format!(
                    "'{text}' is not a valid literal for {}",
                    target.type_name()
                )))
            }
        }
        ValueType::Union(arms) => {
            for arm in arms {
                if let Ok(coerced) = coerce_value(value, arm) {
                    return Ok(coerced);
                }
            }
            Err(CoerceError(format!(
                "'{}' could not be coerced to any of {}",
                value_as_text(value),
                target.type_name()
            )))
        }
        ValueType::Enum { variants, .. } => coerce_enum(value, target, variants),
        ValueType::Custom { parse, .. } => {
            let text = value_as_text(value);
            parse(&text).map_err(CoerceError)
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn coerce_str(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(CoerceError(format!("'{other}' is not a string"))),
    }
}

fn coerce_int(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(|n| json!(n))
            .map_err(|_| CoerceError(format!("'{text}' is not a valid integer"))),
        other => Err(CoerceError(format!("'{other}' is not a valid integer"))),
    }
}

fn coerce_float(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(text) => {
            let parsed = text
                .trim()
                .parse::<f64>()
                .map_err(|_| CoerceError(format!("'{text}' is not a valid float")))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| CoerceError(format!("'{text}' is not a finite float")))
        }
        other => Err(CoerceError(format!("'{other}' is not a valid float"))),
    }
}

fn coerce_bool(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(CoerceError(format!("'{text}' is not a valid boolean"))),
        },
        other => Err(CoerceError(format!("'{other}' is not a valid boolean"))),
    }
}

fn coerce_datetime(value: &Value) -> Result<Value, CoerceError> {
    let Value::String(text) = value else {
        return Err(CoerceError(format!("'{value}' is not a valid datetime")));
    };
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(Value::String(parsed.with_timezone(&Utc).to_rfc3339()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Value::String(parsed.and_utc().to_rfc3339()));
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = parsed.and_hms_opt(0, 0, 0) {
            return Ok(Value::String(midnight.and_utc().to_rfc3339()));
        }
    }
    Err(CoerceError(format!(
        "'{text}' could not be parsed as a datetime"
    )))
}

fn coerce_enum(
    value: &Value,
    target: &ValueType,
    variants: &[(String, Value)],
) -> Result<Value, CoerceError> {
    // Already a member value.
    if variants.iter().any(|(_, variant)| variant == value) {
        return Ok(value.clone());
    }
    // Exact variant name.
    if let Value::String(text) = value {
        if let Some((_, variant)) = variants.iter().find(|(name, _)| name == text) {
            return Ok(variant.clone());
        }
    }
    // Coercible to the variant value type.
    if let Some((_, first)) = variants.first() {
        let base = match first {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Int),
            Value::Number(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::Str),
            Value::Bool(_) => Some(ValueType::Bool),
            _ => None,
        };
        if let Some(base) = base {
            if let Ok(coerced) = coerce_value(value, &base) {
                if variants.iter().any(|(_, variant)| variant == &coerced) {
                    return Ok(coerced);
                }
            }
        }
    }
    let allowed: Vec<String> = variants
        .iter()
        .map(|(_, variant)| value_as_text(variant))
        .collect();
    Err(CoerceError(format!(
        "'{}' should be one of {{{}}} for {}",
        value_as_text(value),
        allowed.join(", "),
        target.type_name()
    )))
}
