//! Cross-subscription lookup table
//!
//! Tag-only subscriptions store their fields here, keyed by the
//! `<source>/<name>` key of the update. Updates from other subscriptions
//! sharing that key pick those fields up as `<subscription>/<field>` tags.

use std::collections::HashMap;

use cloudvision_common::{FieldValue, Tags};
use parking_lot::Mutex;

use crate::flatten::Fields;
use crate::path::last_segment;

/// What [`LookupTable::apply`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The record belongs to a tag-only subscription and was stored.
    Stored,
    /// The record should be emitted; matching annotations were added to its tags.
    Emit,
}

/// measurement name -> subscription key -> field -> value
type Table = HashMap<String, HashMap<String, HashMap<String, FieldValue>>>;

/// Lookup table shared by all subscriber tasks.
#[derive(Debug, Default)]
pub struct LookupTable {
    tables: Mutex<Table>,
}

/// Key under which lookup entries are stored and matched.
pub fn subscription_key(tags: &Tags) -> String {
    format!(
        "{}/{}",
        tags.get("source").map(String::as_str).unwrap_or_default(),
        tags.get("name").map(String::as_str).unwrap_or_default()
    )
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries and register the given measurement names.
    pub fn reset<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut tables = self.tables.lock();
        tables.clear();
        for name in names {
            tables.entry(name.to_string()).or_default();
        }
    }

    #[cfg(test)]
    fn is_registered(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }

    #[cfg(test)]
    fn get(&self, name: &str, key: &str) -> Option<HashMap<String, FieldValue>> {
        self.tables.lock().get(name)?.get(key).cloned()
    }

    /// Store or annotate one record under a single lock acquisition.
    ///
    /// When `name` is registered the fields are merged into the table, keyed
    /// by their last path segment, and [`LookupOutcome::Stored`] is returned.
    /// Otherwise every entry stored under `key` is copied into `tags`.
    pub fn apply(&self, name: &str, key: &str, fields: &Fields, tags: &mut Tags) -> LookupOutcome {
        let mut tables = self.tables.lock();

        if let Some(entries) = tables.get_mut(name) {
            let entry = entries.entry(key.to_string()).or_default();
            for (field, value) in fields {
                entry.insert(last_segment(field).to_string(), value.clone());
            }
            return LookupOutcome::Stored;
        }

        for (subscription, entries) in tables.iter() {
            if let Some(annotations) = entries.get(key) {
                for (field, value) in annotations {
                    tags.insert(format!("{}/{}", subscription, field), value.to_string());
                }
            }
        }

        LookupOutcome::Emit
    }
}
