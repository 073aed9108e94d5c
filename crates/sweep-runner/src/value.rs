use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A typed value that can be read from or written to a configurable field.
///
/// Serialized untagged so that `0.5`, `3`, `true` and `"rbf"` read naturally
/// in experiment files. Integers stay integers and floats stay floats across a
/// JSON or YAML round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "number",
            ValueKind::Text => "string",
        }
    }

    /// Whether a value of kind `found` may be stored in a field of this kind.
    /// Integers widen to floats; nothing else converts.
    pub fn accepts(self, found: ValueKind) -> bool {
        self == found || (self == ValueKind::Float && found == ValueKind::Int)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Float(_) => ValueKind::Float,
            FieldValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Converts to the representation required by a field of kind `target`,
    /// applying the integer-to-float widening.
    pub fn coerce_to(self, target: ValueKind) -> Option<FieldValue> {
        match (target, self) {
            (ValueKind::Float, FieldValue::Int(i)) => Some(FieldValue::Float(i as f64)),
            (target, value) if value.kind() == target => Some(value),
            _ => None,
        }
    }

    /// Maps a scalar JSON value; arrays, objects and null have no field form.
    pub fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float)),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(v) => Value::from(*v),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{:?}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untagged_serde_keeps_int_and_float_apart() {
        let values = vec![
            FieldValue::Int(3),
            FieldValue::Float(3.0),
            FieldValue::Bool(true),
            FieldValue::Text("rbf".to_string()),
        ];
        let encoded = serde_json::to_string(&values).expect("encode");
        assert_eq!(encoded, r#"[3,3.0,true,"rbf"]"#);
        let decoded: Vec<FieldValue> = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, values);
    }

    #[test]
    fn yaml_scalars_map_to_matching_kinds() {
        let decoded: Vec<FieldValue> =
            serde_yaml::from_str("- 0.25\n- 7\n- false\n- linear\n").expect("decode yaml");
        assert_eq!(
            decoded.iter().map(FieldValue::kind).collect::<Vec<_>>(),
            vec![
                ValueKind::Float,
                ValueKind::Int,
                ValueKind::Bool,
                ValueKind::Text
            ]
        );
    }

    #[test]
    fn int_widens_to_float_but_not_back() {
        assert!(ValueKind::Float.accepts(ValueKind::Int));
        assert!(!ValueKind::Int.accepts(ValueKind::Float));
        assert!(!ValueKind::Text.accepts(ValueKind::Bool));
        assert_eq!(
            FieldValue::Int(2).coerce_to(ValueKind::Float),
            Some(FieldValue::Float(2.0))
        );
        assert_eq!(FieldValue::Float(2.5).coerce_to(ValueKind::Int), None);
    }

    #[test]
    fn from_json_rejects_containers() {
        assert_eq!(FieldValue::from_json(&json!(4)), Some(FieldValue::Int(4)));
        assert_eq!(
            FieldValue::from_json(&json!(0.5)),
            Some(FieldValue::Float(0.5))
        );
        assert_eq!(FieldValue::from_json(&json!([1, 2])), None);
        assert_eq!(FieldValue::from_json(&json!(null)), None);
    }
}
