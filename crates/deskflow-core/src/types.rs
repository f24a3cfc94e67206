use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The business-object type a workflow operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Support tickets
    Ticket,
    /// Problem records
    Problem,
    /// Change requests
    Change,
    /// Release records
    Release,
    /// Standalone tasks
    Task,
}

/// Declared type of a workflow variable
///
/// Dates are carried as RFC 3339 strings inside the JSON value model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Text value
    String,
    /// Integer or float
    Number,
    /// true/false
    Boolean,
    /// RFC 3339 date/time string
    Date,
    /// Structured object
    Object,
    /// Ordered list
    Array,
}

/// A trigger firing delivered by the trigger-source collaborator
///
/// The payload is bound into the new run's execution context: object
/// payloads bind each top-level field as a variable, anything else is
/// bound under the single variable `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event payload supplied by the trigger source
    pub payload: Value,
}

impl TriggerEvent {
    /// Create a trigger event from a payload value
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// A manual invocation with an empty payload
    pub fn manual() -> Self {
        Self {
            payload: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Descend a dotted path into a JSON value
///
/// Object segments index by key, array segments by numeric position.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Coerce a value to its declared variable type
///
/// Values that cannot be represented in the declared type are returned
/// unchanged; coercion never fails.
pub fn coerce_declared(var_type: VariableType, value: Value) -> Value {
    match var_type {
        VariableType::String => match value {
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => other,
        },
        VariableType::Number => match value {
            Value::String(s) => parse_number(&s).unwrap_or(Value::String(s)),
            other => other,
        },
        VariableType::Boolean => match value {
            Value::String(s) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(s),
            },
            other => other,
        },
        VariableType::Date => value,
        VariableType::Object => parse_embedded_json(value, '{'),
        VariableType::Array => parse_embedded_json(value, '['),
    }
}

/// Best-effort coercion for values without a declaration
///
/// Numeric strings become numbers, "true"/"false" become booleans, and
/// strings holding valid JSON objects/arrays are parsed.
pub fn coerce_best_effort(value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };
    if let Some(number) = parse_number(&s) {
        return number;
    }
    match s.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    let trimmed = s.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(&s) {
            return parsed;
        }
    }
    Value::String(s)
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Some(Value::Number(n));
        }
    }
    None
}

fn parse_embedded_json(value: Value, opener: char) -> Value {
    match value {
        Value::String(s) if s.trim_start().starts_with(opener) => {
            serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s))
        }
        other => other,
    }
}
