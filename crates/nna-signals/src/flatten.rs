//! Flatten nested vehicle state documents into dotted signal paths.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

const META_KEY: &str = "meta";
const VALUE_KEY: &str = "value";
const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lon", "lng"];
const MAX_REPORTED_SHAPES: usize = 1024;

/// Paths already reported at warn level.
static REPORTED_SHAPES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Flattened signals, sorted by path.
pub type SignalMap = BTreeMap<String, SignalValue>;

/// Scalar value carried by one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl SignalValue {
    /// Scalar JSON values only; null, arrays and objects yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(SignalValue::Bool(*flag)),
            Value::Number(number) => Some(SignalValue::Number(number.clone())),
            Value::String(text) => Some(SignalValue::Text(text.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Number(number) => number.as_f64(),
            SignalValue::Text(text) => text.trim().parse().ok(),
            SignalValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(flag) => write!(f, "{flag}"),
            SignalValue::Number(number) => write!(f, "{number}"),
            SignalValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
            .map(SignalValue::Number)
            .unwrap_or_else(|| SignalValue::Text(value.to_string()))
    }
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        SignalValue::Number(value.into())
    }
}

impl From<bool> for SignalValue {
    fn from(value: bool) -> Self {
        SignalValue::Bool(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        SignalValue::Text(value.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        SignalValue::Text(value)
    }
}

/// Flatten a state document. Never fails: shapes that do not reduce to a
/// scalar are logged and dropped.
pub fn flatten(data: &Value) -> SignalMap {
    let mut signals = SignalMap::new();
    match data {
        Value::Object(object) => walk_object(None, object, &mut signals),
        other => report_unsupported("", other),
    }
    signals
}

enum Leaf {
    Scalar(SignalValue),
    Unsupported,
    NotALeaf,
}

fn walk_object(prefix: Option<&str>, object: &Map<String, Value>, signals: &mut SignalMap) {
    for (key, value) in object {
        if key == META_KEY {
            continue;
        }
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        walk_value(path, value, signals);
    }
}

fn walk_value(path: String, value: &Value, signals: &mut SignalMap) {
    let Value::Object(object) = value else {
        match SignalValue::from_json(value) {
            Some(scalar) => {
                signals.insert(path, scalar);
            }
            None => report_unsupported(&path, value),
        }
        return;
    };

    if let Some(location) = location_pair(object) {
        signals.insert(path.clone(), SignalValue::Text(location));
        let extras = object
            .iter()
            .filter(|(key, _)| !is_coordinate_key(key) && key.as_str() != META_KEY);
        for (key, field) in extras {
            walk_value(format!("{path}.{key}"), field, signals);
        }
        return;
    }

    match collapse(object) {
        Leaf::Scalar(scalar) => {
            signals.insert(path, scalar);
        }
        Leaf::Unsupported => report_unsupported(&path, value),
        Leaf::NotALeaf if has_fields(object) => walk_object(Some(&path), object, signals),
        Leaf::NotALeaf => report_unsupported(&path, value),
    }
}

/// Reduce `{value_key: scalar, meta: {...}}` or `{value: scalar}` to its scalar.
fn collapse(object: &Map<String, Value>) -> Leaf {
    let has_meta = object.contains_key(META_KEY);
    let mut fields = object.iter().filter(|(key, _)| key.as_str() != META_KEY);
    let (Some((key, inner)), None) = (fields.next(), fields.next()) else {
        return Leaf::NotALeaf;
    };
    if !has_meta && key != VALUE_KEY {
        return Leaf::NotALeaf;
    }
    match inner {
        Value::Object(_) => Leaf::NotALeaf,
        scalar => SignalValue::from_json(scalar).map_or(Leaf::Unsupported, Leaf::Scalar),
    }
}

fn location_pair(object: &Map<String, Value>) -> Option<String> {
    let coordinate = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| object.get(*key).and_then(Value::as_number))
            .map(Number::to_string)
    };
    let latitude = coordinate(LATITUDE_KEYS)?;
    let longitude = coordinate(LONGITUDE_KEYS)?;
    Some(format!("{latitude},{longitude}"))
}

fn is_coordinate_key(key: &str) -> bool {
    LATITUDE_KEYS.contains(&key) || LONGITUDE_KEYS.contains(&key)
}

fn has_fields(object: &Map<String, Value>) -> bool {
    object.keys().any(|key| key != META_KEY)
}

fn report_unsupported(path: &str, value: &Value) {
    let first_sighting = {
        let mut reported = REPORTED_SHAPES
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if reported.contains(path) {
            false
        } else {
            if reported.len() < MAX_REPORTED_SHAPES {
                reported.insert(path.to_string());
            }
            true
        }
    };
    let shape = shape_name(value);
    if first_sighting {
        tracing::warn!(path, shape, "dropping unsupported signal shape");
    } else {
        tracing::debug!(path, shape, "dropping unsupported signal shape");
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Bool(_) | Value::Number(_) | Value::String(_) => "scalar",
    }
}
