//! Batching of decoded fields into measurements.

use std::collections::HashMap;

use cloudvision_common::{FieldValue, Measurement, Tags};

/// Identity of a grouped measurement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    tags: Tags,
    timestamp: i64,
}

/// Merges fields sharing `(name, tags, timestamp)` into one measurement.
///
/// Measurements are returned in the order their identity was first seen.
/// A repeated field key within one measurement keeps the last value.
#[derive(Debug, Default)]
pub struct MetricGrouper {
    index: HashMap<SeriesKey, usize>,
    measurements: Vec<Measurement>,
}

impl MetricGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one field to the measurement identified by `(name, tags, timestamp)`.
    pub fn add(
        &mut self,
        name: &str,
        tags: &Tags,
        timestamp: i64,
        field: impl Into<String>,
        value: FieldValue,
    ) {
        let key = SeriesKey {
            name: name.to_string(),
            tags: tags.clone(),
            timestamp,
        };

        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.measurements
                    .push(Measurement::new(name, tags.clone(), timestamp));
                self.index.insert(key, self.measurements.len() - 1);
                self.measurements.len() - 1
            }
        };

        self.measurements[slot].fields.insert(field.into(), value);
    }

    /// Number of distinct measurements collected so far.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Consume the grouper, yielding every measurement once.
    pub fn into_measurements(self) -> Vec<Measurement> {
        self.measurements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_same_identity_merges_fields() {
        let t = tags(&[("host", "leaf1"), ("name", "Ethernet1")]);
        let mut grouper = MetricGrouper::new();
        grouper.add("ifcounters", &t, 100, "in_octets", FieldValue::Uint(1));
        grouper.add("ifcounters", &t, 100, "out_octets", FieldValue::Uint(2));

        let measurements = grouper.into_measurements();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].fields.len(), 2);
        assert_eq!(measurements[0].tags, t);
    }

    #[test]
    fn test_last_write_wins() {
        let t = tags(&[("host", "leaf1")]);
        let mut grouper = MetricGrouper::new();
        grouper.add("system", &t, 100, "uptime", FieldValue::Uint(1));
        grouper.add("system", &t, 100, "uptime", FieldValue::Uint(2));

        let measurements = grouper.into_measurements();
        assert_eq!(measurements.len(), 1);
        assert_eq!(
            measurements[0].fields.get("uptime"),
            Some(&FieldValue::Uint(2))
        );
    }

    #[test]
    fn test_distinct_identities_stay_separate() {
        let mut grouper = MetricGrouper::new();
        grouper.add("ifcounters", &tags(&[("name", "Ethernet1")]), 100, "in_octets", FieldValue::Uint(1));
        grouper.add("ifcounters", &tags(&[("name", "Ethernet2")]), 100, "in_octets", FieldValue::Uint(1));
        grouper.add("ifcounters", &tags(&[("name", "Ethernet1")]), 200, "in_octets", FieldValue::Uint(1));
        grouper.add("ifstate", &tags(&[("name", "Ethernet1")]), 100, "mtu", FieldValue::Uint(1500));

        assert_eq!(grouper.len(), 4);
        let names: Vec<_> = grouper
            .into_measurements()
            .into_iter()
            .map(|m| (m.name, m.timestamp))
            .collect();
        assert_eq!(
            names,
            vec![
                ("ifcounters".to_string(), 100),
                ("ifcounters".to_string(), 100),
                ("ifcounters".to_string(), 200),
                ("ifstate".to_string(), 100),
            ]
        );
    }
}
