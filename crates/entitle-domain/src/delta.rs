//! Field-level differences between two entitlement access documents.
//!
//! A key that disappears is recorded as [`Delta::Removed`], which is not the
//! same thing as a key whose value changed to `null` or `false`: callers treat
//! removal of `entitled` (or of the whole `entitlement` object) as loss of the
//! entitlement.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

pub type DeltaMap = BTreeMap<String, Delta>;

#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    /// Present in the original document, absent from the new one.
    Removed,
    /// Changed or newly added value.
    Set(Value),
    /// Both sides hold objects; only the differing sub-keys are kept.
    Nested(DeltaMap),
}

impl Delta {
    /// Looks up a sub-key of this delta.
    ///
    /// Newly added objects arrive as `Set(Value::Object(..))`, so their
    /// children are surfaced as `Set` as well.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<Delta> {
        match self {
            Delta::Nested(map) => map.get(key).cloned(),
            Delta::Set(Value::Object(map)) => map.get(key).cloned().map(Delta::Set),
            Delta::Set(_) | Delta::Removed => None,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Delta::Set(value) => Some(value),
            Delta::Removed | Delta::Nested(_) => None,
        }
    }
}

/// Computes the recursive delta from `orig` to `new`.
///
/// Non-object inputs are treated as empty documents.
#[must_use]
pub fn dict_deltas(orig: &Value, new: &Value) -> DeltaMap {
    let empty = Map::new();
    let orig = orig.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);
    deltas_at(orig, new, "")
}

fn deltas_at(orig: &Map<String, Value>, new: &Map<String, Value>, path: &str) -> DeltaMap {
    let mut deltas = DeltaMap::new();
    for (key, value) in orig {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        match (value, new.get(key)) {
            (Value::Object(old_map), Some(Value::Object(new_map))) => {
                let sub = deltas_at(old_map, new_map, &key_path);
                if !sub.is_empty() {
                    deltas.insert(key.clone(), Delta::Nested(sub));
                }
            }
            (_, None) => {
                debug!(key = %key_path, "contract value removed");
                deltas.insert(key.clone(), Delta::Removed);
            }
            (old, Some(updated)) if old != updated => {
                debug!(key = %key_path, value = %updated, "contract value changed");
                deltas.insert(key.clone(), Delta::Set(updated.clone()));
            }
            _ => {}
        }
    }
    for (key, value) in new {
        if !orig.contains_key(key) {
            deltas.insert(key.clone(), Delta::Set(value.clone()));
        }
    }
    deltas
}
