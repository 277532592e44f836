//! JSON flattening into dotted leaf fields.

use std::collections::BTreeMap;

use cloudvision_common::FieldValue;
use serde_json::Value;

/// Decoded fields keyed by field name.
pub type Fields = BTreeMap<String, FieldValue>;

/// Flatten a JSON value into `fields`, one entry per leaf.
///
/// Object members and array items extend `name` with `.<key>` and
/// `.<index>`. Numbers become floats; nulls are skipped.
pub fn flatten_json(name: &str, value: &Value, fields: &mut Fields) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_json(&join(name, key), value, fields);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_json(&join(name, &index.to_string()), value, fields);
            }
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                fields.insert(name.to_string(), FieldValue::Float(f));
            }
        }
        Value::String(s) => {
            fields.insert(name.to_string(), FieldValue::String(s.clone()));
        }
        Value::Bool(b) => {
            fields.insert(name.to_string(), FieldValue::Bool(*b));
        }
        Value::Null => {}
    }
}

fn join(name: &str, key: &str) -> String {
    if name.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", name, key)
    }
}
