//! Conversion between XPath-like strings and gNMI paths
//!
//! `/interfaces/interface[name=Ethernet1]/state/counters` parses into four
//! elements, the second carrying the key `name=Ethernet1`. Rendering walks the
//! elements back into a slash path while moving every key predicate into a
//! tag set.

use std::collections::HashMap;

use cloudvision_common::Tags;

use crate::config::SubscriptionSpec;
use crate::error::PathError;
use crate::gnmi::{Path, PathElem};

/// Registered alias paths: rendered path -> measurement name.
pub type Aliases = HashMap<String, String>;

/// Parse a path string into one gNMI path per target.
///
/// Every returned path carries the same elements; only `target` differs.
/// The path is validated even when `targets` is empty.
pub fn parse(origin: &str, path: &str, targets: &[String]) -> Result<Vec<Path>, PathError> {
    let elems = parse_elems(path)?;

    Ok(targets
        .iter()
        .map(|target| Path {
            origin: origin.to_string(),
            target: target.clone(),
            elem: elems.clone(),
            ..Default::default()
        })
        .collect())
}

/// Parse a path string without a target.
pub fn parse_one(origin: &str, path: &str) -> Result<Path, PathError> {
    Ok(Path {
        origin: origin.to_string(),
        elem: parse_elems(path)?,
        ..Default::default()
    })
}

fn parse_elems(path: &str) -> Result<Vec<PathElem>, PathError> {
    if !path.is_empty() && !path.starts_with('/') {
        return Err(PathError::MissingLeadingSlash(path.to_string()));
    }

    let bytes = path.as_bytes();
    let mut elems = Vec::new();
    let mut keys = HashMap::new();

    // Offsets into `path`: start of the current element, end of its name,
    // start of the current predicate key and of its value.
    let mut start = 0;
    let mut name_end: Option<usize> = None;
    let mut key_start: Option<usize> = None;
    let mut value_start: Option<usize> = None;

    let syntax = |start: usize, at: usize, reason: &'static str| PathError::Syntax {
        path: path.to_string(),
        fragment: path[start..(at + 1).min(path.len())].to_string(),
        reason,
    };

    // A virtual trailing '/' closes the last element.
    for i in 0..=bytes.len() {
        match bytes.get(i).copied().unwrap_or(b'/') {
            b'[' => {
                if key_start.is_some() {
                    return Err(syntax(start, i, "nested '['"));
                }
                name_end.get_or_insert(i);
                key_start = Some(i + 1);
            }
            b'=' => match (key_start, value_start) {
                (Some(_), None) => value_start = Some(i + 1),
                (None, _) => return Err(syntax(start, i, "'=' outside of a key predicate")),
                (Some(_), Some(_)) => return Err(syntax(start, i, "repeated '=' in key predicate")),
            },
            b']' => {
                let (Some(key), Some(value)) = (key_start, value_start) else {
                    return Err(syntax(start, i, "']' without matching '[' and '='"));
                };
                keys.insert(
                    path[key..value - 1].to_string(),
                    unquote(&path[value..i]).to_string(),
                );
                key_start = None;
                value_start = None;
            }
            b'/' if key_start.is_none() => {
                let end = name_end.unwrap_or(i);
                if end > start {
                    elems.push(PathElem {
                        name: path[start..end].to_string(),
                        key: std::mem::take(&mut keys),
                    });
                } else {
                    keys.clear();
                }
                start = i + 1;
                name_end = None;
            }
            _ => {}
        }
    }

    if key_start.is_some() {
        return Err(syntax(start, path.len(), "unterminated '['"));
    }

    Ok(elems)
}

/// Strip one leading and one trailing quote or apostrophe.
fn unquote(value: &str) -> &str {
    let value = value
        .strip_prefix(['"', '\''])
        .unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value)
}

/// Render a gNMI path back into a slash path.
///
/// The result starts with `prefix`, followed by `origin:` when set and
/// `/name` for each element. When `tags` is given, each key predicate is
/// written into it under its bare name, or as `<path so far>/<key>` when the
/// bare name is already taken. The second value is the longest rendered
/// sub-path registered in `aliases`, if any.
pub fn render(
    path: &Path,
    mut tags: Option<&mut Tags>,
    prefix: &str,
    aliases: &Aliases,
) -> (String, Option<String>) {
    let mut rendered = String::from(prefix);
    let mut alias = None;

    if !path.origin.is_empty() {
        rendered.push_str(&path.origin);
        rendered.push(':');
    }

    for elem in &path.elem {
        if !elem.name.is_empty() {
            rendered.push('/');
            rendered.push_str(&elem.name);
        }

        if aliases.contains_key(&rendered) {
            alias = Some(rendered.clone());
        }

        if let Some(tags) = tags.as_deref_mut() {
            let mut keys: Vec<_> = elem.key.iter().collect();
            keys.sort();
            for (key, value) in keys {
                let key = key.replace('-', "_");
                if tags.contains_key(&key) {
                    tags.insert(format!("{}/{}", rendered, key), value.clone());
                } else {
                    tags.insert(key, value.clone());
                }
            }
        }
    }

    (rendered, alias)
}

/// Last `/`-separated segment of a rendered path.
pub fn last_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Build the alias registry from subscriptions and explicit aliases.
///
/// Each subscription registers both its origin-qualified and its bare path
/// under its name, or under the last path segment when unnamed. Explicit
/// aliases map a measurement name to a path.
pub fn build_aliases(
    subscriptions: &[SubscriptionSpec],
    explicit: &HashMap<String, String>,
) -> Result<Aliases, PathError> {
    let mut aliases = Aliases::new();
    let empty = Aliases::new();

    for sub in subscriptions {
        let (long, _) = render(&parse_one(&sub.origin, &sub.path)?, None, "", &empty);
        let (short, _) = render(&parse_one("", &sub.path)?, None, "", &empty);

        let name = if sub.name.is_empty() {
            last_segment(&short).to_string()
        } else {
            sub.name.clone()
        };

        if !name.is_empty() {
            aliases.insert(long, name.clone());
            aliases.insert(short, name);
        }
    }

    for (name, path) in explicit {
        aliases.insert(path.clone(), name.clone());
    }

    Ok(aliases)
}
