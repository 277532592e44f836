//! Subscribe response decoding
//!
//! Turns gNMI notifications into grouped measurements: paths become field
//! keys and tags, typed values become field values, and tag-only
//! subscriptions feed the lookup table instead of the accumulator.

use std::sync::Arc;

use cloudvision_common::{FieldValue, Measurement, Tags};
use tracing::{debug, error, info};

use crate::discovery::DeviceMap;
use crate::error::{DecodeError, Error};
use crate::flatten::{Fields, flatten_json};
use crate::gnmi::{
    Decimal64, Notification, ScalarArray, SubscribeResponse, TypedValue, subscribe_response,
    typed_value,
};
use crate::grouper::MetricGrouper;
use crate::lookup::{LookupOutcome, LookupTable, subscription_key};
use crate::path::{self, Aliases, last_segment};
use crate::sink::Accumulator;

/// Decoder shared by every subscriber task.
#[derive(Debug, Clone)]
pub struct ResponseHandler {
    aliases: Arc<Aliases>,
    lookup: Arc<LookupTable>,
    devices: Arc<DeviceMap>,
    default_measurement: String,
}

impl ResponseHandler {
    pub fn new(
        aliases: Arc<Aliases>,
        lookup: Arc<LookupTable>,
        devices: Arc<DeviceMap>,
        default_measurement: impl Into<String>,
    ) -> Self {
        Self {
            aliases,
            lookup,
            devices,
            default_measurement: default_measurement.into(),
        }
    }

    /// Handle one response received on the stream of `target`.
    pub fn handle(&self, target: &str, response: SubscribeResponse, acc: &dyn Accumulator) {
        match response.response {
            Some(subscribe_response::Response::Update(notification)) => {
                for measurement in self.decode_notification(target, &notification, acc) {
                    acc.add_measurement(measurement);
                }
            }
            Some(subscribe_response::Response::SyncResponse(_)) => {
                debug!(target = %target, "Received sync response");
            }
            Some(subscribe_response::Response::Error(e)) => {
                error!(target = %target, code = e.code, message = %e.message, "Subscribe error");
            }
            None => {
                debug!(target = %target, "Received empty response");
            }
        }
    }

    /// Decode a notification received on the stream of `target`.
    ///
    /// The prefix target names the device; when the prefix carries none the
    /// stream target is used instead. Records from tag-only subscriptions are
    /// stored in the lookup table and produce no measurement. Per-record
    /// failures are logged or reported to `acc` and never abort the rest of
    /// the notification.
    pub fn decode_notification(
        &self,
        target: &str,
        notification: &Notification,
        acc: &dyn Accumulator,
    ) -> Vec<Measurement> {
        let mut prefix_tags = Tags::new();
        let (prefix, prefix_alias) = match &notification.prefix {
            Some(p) => path::render(p, Some(&mut prefix_tags), "", &self.aliases),
            None => (String::new(), None),
        };

        let target = notification
            .prefix
            .as_ref()
            .map(|p| p.target.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(target)
            .to_string();
        let host = self.devices.fqdn(&target).unwrap_or_default();
        prefix_tags.insert("host-id".to_string(), target);
        prefix_tags.insert("host".to_string(), host);

        let mut grouper = MetricGrouper::new();

        for update in &notification.update {
            let mut tags = prefix_tags.clone();
            let (rendered, alias) = match &update.path {
                Some(p) => path::render(p, Some(&mut tags), &prefix, &self.aliases),
                None => (prefix.clone(), None),
            };
            let alias = alias.or_else(|| prefix_alias.clone());
            let key = rendered.replace('-', "_");

            let fields = match decode_value(&key, update.val.as_ref()) {
                Ok(fields) => fields,
                Err(DecodeError::MissingValue(path)) => {
                    info!(path = %path, "Discarded empty or legacy type value");
                    continue;
                }
                Err(e) => {
                    acc.add_error(&Error::Decode(e));
                    continue;
                }
            };

            let name = self.measurement_name(alias.as_deref(), &prefix);
            let subscription = subscription_key(&tags);
            if self.lookup.apply(&name, &subscription, &fields, &mut tags) == LookupOutcome::Stored
            {
                continue;
            }

            for (field, value) in fields {
                match field_key(&field, alias.as_deref()) {
                    Some(field) => {
                        grouper.add(&name, &tags, notification.timestamp, field, value);
                    }
                    None => {
                        error!(error = %DecodeError::EmptyFieldKey(field), "Dropping field");
                    }
                }
            }
        }

        grouper.into_measurements()
    }

    fn measurement_name(&self, alias: Option<&str>, prefix: &str) -> String {
        if let Some(name) = alias.and_then(|a| self.aliases.get(a)) {
            return name.clone();
        }
        if !prefix.is_empty() {
            debug!(prefix = %prefix, "No measurement alias for path");
            return prefix.to_string();
        }
        self.default_measurement.clone()
    }
}

/// Decode a typed value into fields under `name`.
///
/// Scalars produce a single field; JSON payloads are flattened into one
/// field per leaf.
pub fn decode_value(name: &str, value: Option<&TypedValue>) -> Result<Fields, DecodeError> {
    let value = value
        .and_then(|v| v.value.as_ref())
        .ok_or_else(|| DecodeError::MissingValue(name.to_string()))?;

    let mut fields = Fields::new();
    match value {
        typed_value::Value::JsonVal(data) | typed_value::Value::JsonIetfVal(data) => {
            let json: serde_json::Value =
                serde_json::from_slice(data).map_err(|source| DecodeError::Json {
                    path: name.to_string(),
                    source,
                })?;
            flatten_json(name, &json, &mut fields);
        }
        scalar => {
            if let Some(value) = scalar_value(scalar) {
                fields.insert(name.to_string(), value);
            }
        }
    }

    Ok(fields)
}

/// Scalar field value of a typed value; `None` for JSON payloads.
fn scalar_value(value: &typed_value::Value) -> Option<FieldValue> {
    use typed_value::Value;

    let value = match value {
        Value::StringVal(s) | Value::AsciiVal(s) => FieldValue::String(s.clone()),
        Value::IntVal(i) => FieldValue::Int(*i),
        Value::UintVal(u) => FieldValue::Uint(*u),
        Value::BoolVal(b) => FieldValue::Bool(*b),
        Value::BytesVal(b) | Value::ProtoBytes(b) => FieldValue::Bytes(b.clone()),
        Value::FloatVal(f) => FieldValue::Float(f64::from(*f)),
        Value::DoubleVal(d) => FieldValue::Float(*d),
        Value::DecimalVal(d) => FieldValue::Float(decimal_to_f64(d)),
        Value::LeaflistVal(list) => FieldValue::String(leaf_list_text(list)),
        Value::AnyVal(any) => FieldValue::Bytes(any.value.clone()),
        Value::JsonVal(_) | Value::JsonIetfVal(_) => return None,
    };

    Some(value)
}

/// `digits * 10^-precision`
pub fn decimal_to_f64(decimal: &Decimal64) -> f64 {
    decimal.digits as f64 / 10f64.powf(f64::from(decimal.precision))
}

/// Render a leaf-list as `[a, b, c]`.
fn leaf_list_text(list: &ScalarArray) -> String {
    let items: Vec<String> = list
        .element
        .iter()
        .filter_map(|e| e.value.as_ref())
        .map(|v| match v {
            typed_value::Value::JsonVal(data) | typed_value::Value::JsonIetfVal(data) => {
                String::from_utf8_lossy(data).into_owned()
            }
            other => scalar_value(other)
                .map(|f| f.to_string())
                .unwrap_or_default(),
        })
        .collect();

    format!("[{}]", items.join(", "))
}

/// Field key for a decoded field.
///
/// When the alias path is a strict prefix of the field, the alias and its
/// separator are stripped. Otherwise the last path segment is used, trimmed
/// of leading `/` and `.`. Returns `None` when nothing is left.
pub fn field_key(field: &str, alias: Option<&str>) -> Option<String> {
    if let Some(alias) = alias.filter(|a| !a.is_empty()) {
        let alias = alias.replace('-', "_");
        let rest = field
            .strip_prefix(alias.as_str())
            .and_then(|rest| rest.strip_prefix(['/', '.']))
            .filter(|rest| !rest.is_empty());
        if let Some(rest) = rest {
            return Some(rest.to_string());
        }
    }

    let key = last_segment(field).trim_start_matches(['/', '.']);
    (!key.is_empty()).then(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnmi::{Path, PathElem, Update};
    use crate::sink::MemoryAccumulator;
    use std::collections::HashMap;

    fn elem(name: &str, keys: &[(&str, &str)]) -> PathElem {
        PathElem {
            name: name.to_string(),
            key: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn update(elems: Vec<PathElem>, value: typed_value::Value) -> Update {
        Update {
            path: Some(Path {
                elem: elems,
                ..Default::default()
            }),
            val: Some(TypedValue { value: Some(value) }),
            ..Default::default()
        }
    }

    fn handler(aliases: &[(&str, &str)], tag_only: &[&str]) -> ResponseHandler {
        let aliases: Aliases = aliases
            .iter()
            .map(|(path, name)| (path.to_string(), name.to_string()))
            .collect();
        let lookup = LookupTable::new();
        lookup.reset(tag_only.iter().copied());
        let devices = DeviceMap::new();
        let mut discovered = HashMap::new();
        discovered.insert("leaf1.example.com".to_string(), "JPE1".to_string());
        devices.merge(&discovered);

        ResponseHandler::new(
            Arc::new(aliases),
            Arc::new(lookup),
            Arc::new(devices),
            "arista_cloudvision_telemetry",
        )
    }

    fn counters_notification(timestamp: i64) -> Notification {
        Notification {
            timestamp,
            prefix: Some(Path {
                target: "JPE1".to_string(),
                elem: vec![
                    elem("interfaces", &[]),
                    elem("interface", &[("name", "Ethernet1")]),
                    elem("state", &[]),
                    elem("counters", &[]),
                ],
                ..Default::default()
            }),
            update: vec![
                update(vec![elem("in-octets", &[])], typed_value::Value::UintVal(100)),
                update(vec![elem("out-octets", &[])], typed_value::Value::UintVal(200)),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_decimal_to_f64() {
        let d = Decimal64 {
            digits: 12345,
            precision: 2,
        };
        assert!((decimal_to_f64(&d) - 123.45).abs() < 1e-9);

        let d = Decimal64 {
            digits: -5,
            precision: 0,
        };
        assert_eq!(decimal_to_f64(&d), -5.0);
    }

    #[test]
    fn test_decode_scalars() {
        let cases = vec![
            (typed_value::Value::IntVal(-3), FieldValue::Int(-3)),
            (typed_value::Value::UintVal(3), FieldValue::Uint(3)),
            (typed_value::Value::BoolVal(true), FieldValue::Bool(true)),
            (typed_value::Value::DoubleVal(1.5), FieldValue::Float(1.5)),
            (typed_value::Value::FloatVal(0.5), FieldValue::Float(0.5)),
            (
                typed_value::Value::AsciiVal("up".to_string()),
                FieldValue::String("up".to_string()),
            ),
            (
                typed_value::Value::BytesVal(vec![1, 2]),
                FieldValue::Bytes(vec![1, 2]),
            ),
        ];

        for (value, expected) in cases {
            let fields = decode_value("/x", Some(&TypedValue { value: Some(value) })).unwrap();
            assert_eq!(fields.get("/x"), Some(&expected));
        }
    }

    #[test]
    fn test_decode_leaf_list() {
        let list = ScalarArray {
            element: vec![
                TypedValue {
                    value: Some(typed_value::Value::StringVal("a".to_string())),
                },
                TypedValue {
                    value: Some(typed_value::Value::UintVal(2)),
                },
            ],
        };
        let value = TypedValue {
            value: Some(typed_value::Value::LeaflistVal(list)),
        };

        let fields = decode_value("/x", Some(&value)).unwrap();
        assert_eq!(fields.get("/x"), Some(&FieldValue::String("[a, 2]".to_string())));
    }

    #[test]
    fn test_decode_json_flattens() {
        let value = TypedValue {
            value: Some(typed_value::Value::JsonIetfVal(
                br#"{"in-octets": 10, "oper": "UP"}"#.to_vec(),
            )),
        };

        let fields = decode_value("/state", Some(&value)).unwrap();
        assert_eq!(fields.get("/state.in-octets"), Some(&FieldValue::Float(10.0)));
        assert_eq!(
            fields.get("/state.oper"),
            Some(&FieldValue::String("UP".to_string()))
        );
    }

    #[test]
    fn test_decode_invalid_json() {
        let value = TypedValue {
            value: Some(typed_value::Value::JsonVal(b"{not json".to_vec())),
        };
        assert!(matches!(
            decode_value("/state", Some(&value)),
            Err(DecodeError::Json { .. })
        ));
    }

    #[test]
    fn test_decode_missing_value() {
        assert!(matches!(
            decode_value("/x", None),
            Err(DecodeError::MissingValue(_))
        ));
        assert!(matches!(
            decode_value("/x", Some(&TypedValue { value: None })),
            Err(DecodeError::MissingValue(_))
        ));
    }

    #[test]
    fn test_field_key() {
        assert_eq!(
            field_key(
                "/interfaces/interface/state/counters/in_octets",
                Some("/interfaces/interface/state/counters")
            ),
            Some("in_octets".to_string())
        );
        // Alias paths are compared after "-" normalization.
        assert_eq!(
            field_key("/system/cpu_usage/total", Some("/system/cpu-usage")),
            Some("total".to_string())
        );
        assert_eq!(
            field_key("/state.counters.in", Some("/state")),
            Some("counters.in".to_string())
        );
        // Alias equal to the field falls back to the last segment.
        assert_eq!(
            field_key("/system/state/hostname", Some("/system/state/hostname")),
            Some("hostname".to_string())
        );
        assert_eq!(field_key("/a/b", None), Some("b".to_string()));
        assert_eq!(field_key("/", None), None);
        assert_eq!(field_key("", Some("/a")), None);
    }

    #[test]
    fn test_notification_groups_fields() {
        let handler = handler(
            &[("/interfaces/interface/state/counters", "ifcounters")],
            &[],
        );
        let acc = MemoryAccumulator::new();

        let measurements = handler.decode_notification("JPE1", &counters_notification(42), &acc);
        assert_eq!(measurements.len(), 1);

        let m = &measurements[0];
        assert_eq!(m.name, "ifcounters");
        assert_eq!(m.timestamp, 42);
        assert_eq!(m.tags.get("host-id"), Some(&"JPE1".to_string()));
        assert_eq!(m.tags.get("host"), Some(&"leaf1.example.com".to_string()));
        assert_eq!(m.tags.get("name"), Some(&"Ethernet1".to_string()));
        assert_eq!(m.fields.get("in_octets"), Some(&FieldValue::Uint(100)));
        assert_eq!(m.fields.get("out_octets"), Some(&FieldValue::Uint(200)));
        assert!(acc.errors().is_empty());
    }

    #[test]
    fn test_unaliased_prefix_names_measurement() {
        let handler = handler(&[], &[]);
        let measurements = handler.decode_notification(
            "JPE1",
            &counters_notification(1),
            &MemoryAccumulator::new(),
        );

        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].name, "/interfaces/interface/state/counters");
        assert!(measurements[0].fields.contains_key("in_octets"));
    }

    #[test]
    fn test_default_measurement_without_prefix() {
        let handler = handler(&[], &[]);
        let notification = Notification {
            timestamp: 1,
            update: vec![update(
                vec![elem("system", &[]), elem("uptime", &[])],
                typed_value::Value::UintVal(5),
            )],
            ..Default::default()
        };

        let measurements =
            handler.decode_notification("", &notification, &MemoryAccumulator::new());
        assert_eq!(measurements[0].name, "arista_cloudvision_telemetry");
        assert_eq!(measurements[0].tags.get("host-id"), Some(&String::new()));
        assert_eq!(measurements[0].tags.get("host"), Some(&String::new()));
    }

    #[test]
    fn test_missing_prefix_target_uses_stream_target() {
        let handler = handler(&[], &[]);
        let mut notification = Notification {
            timestamp: 1,
            update: vec![update(
                vec![elem("system", &[]), elem("uptime", &[])],
                typed_value::Value::UintVal(5),
            )],
            ..Default::default()
        };

        let measurements =
            handler.decode_notification("JPE1", &notification, &MemoryAccumulator::new());
        assert_eq!(measurements[0].tags.get("host-id"), Some(&"JPE1".to_string()));
        assert_eq!(
            measurements[0].tags.get("host"),
            Some(&"leaf1.example.com".to_string())
        );

        // A prefix without a target falls back the same way.
        notification.prefix = Some(Path {
            origin: "openconfig".to_string(),
            ..Default::default()
        });
        let measurements =
            handler.decode_notification("JPE1", &notification, &MemoryAccumulator::new());
        assert_eq!(measurements[0].tags.get("host-id"), Some(&"JPE1".to_string()));
        assert_eq!(
            measurements[0].tags.get("host"),
            Some(&"leaf1.example.com".to_string())
        );
    }

    #[test]
    fn test_unknown_target_has_empty_host() {
        let handler = handler(&[], &[]);
        let mut notification = counters_notification(1);
        if let Some(prefix) = notification.prefix.as_mut() {
            prefix.target = "UNKNOWN".to_string();
        }

        let measurements =
            handler.decode_notification("JPE1", &notification, &MemoryAccumulator::new());
        assert_eq!(measurements[0].tags.get("host-id"), Some(&"UNKNOWN".to_string()));
        assert_eq!(measurements[0].tags.get("host"), Some(&String::new()));
    }

    #[test]
    fn test_tag_only_subscription_stores_and_annotates() {
        let handler = handler(
            &[
                ("/interfaces/interface/state/description", "ifdesc"),
                ("/interfaces/interface/state/counters", "ifcounters"),
            ],
            &["ifdesc"],
        );
        let acc = MemoryAccumulator::new();

        let description = Notification {
            timestamp: 1,
            prefix: Some(Path {
                target: "JPE1".to_string(),
                ..Default::default()
            }),
            update: vec![update(
                vec![
                    elem("interfaces", &[]),
                    elem("interface", &[("name", "Ethernet1")]),
                    elem("state", &[]),
                    elem("description", &[]),
                ],
                typed_value::Value::StringVal("uplink".to_string()),
            )],
            ..Default::default()
        };
        assert!(handler.decode_notification("JPE1", &description, &acc).is_empty());

        let measurements = handler.decode_notification("JPE1", &counters_notification(2), &acc);
        assert_eq!(measurements.len(), 1);
        assert_eq!(
            measurements[0].tags.get("ifdesc/description"),
            Some(&"uplink".to_string())
        );
    }

    #[test]
    fn test_empty_and_invalid_records_do_not_abort() {
        let handler = handler(&[("/interfaces/interface/state/counters", "ifcounters")], &[]);
        let acc = MemoryAccumulator::new();

        let mut notification = counters_notification(1);
        notification.update.insert(
            0,
            Update {
                path: Some(Path {
                    elem: vec![elem("broken", &[])],
                    ..Default::default()
                }),
                val: None,
                ..Default::default()
            },
        );
        notification.update.push(update(
            vec![elem("json", &[])],
            typed_value::Value::JsonVal(b"{".to_vec()),
        ));

        let measurements = handler.decode_notification("JPE1", &notification, &acc);
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].fields.len(), 2);
        assert_eq!(acc.errors().len(), 1);
    }

    #[test]
    fn test_handle_emits_to_accumulator() {
        let handler = handler(&[("/interfaces/interface/state/counters", "ifcounters")], &[]);
        let acc = MemoryAccumulator::new();

        handler.handle(
            "JPE1",
            SubscribeResponse {
                response: Some(subscribe_response::Response::Update(counters_notification(7))),
            },
            &acc,
        );
        handler.handle(
            "JPE1",
            SubscribeResponse {
                response: Some(subscribe_response::Response::SyncResponse(true)),
            },
            &acc,
        );

        let measurements = acc.measurements();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].timestamp, 7);
    }
}
