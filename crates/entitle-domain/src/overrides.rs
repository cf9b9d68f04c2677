//! Platform-specific override resolution for entitlement access documents.
//!
//! Two sources feed the resolver: the legacy per-series map under
//! `entitlement.series` and the `entitlement.overrides` list, whose entries
//! carry an explicit selector. Every matching override gets a weight; they are
//! applied lowest weight first so the most specific one wins on conflicts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Weight of an entry in the per-series override map.
pub const SERIES_MAP_WEIGHT: u32 = 1;

const SELECTOR_WEIGHTS: &[(&str, u32)] = &[("series", 2), ("cloud", 3), ("variant", 4)];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContext {
    pub series: String,
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl PlatformContext {
    pub fn new(series: impl Into<String>, cloud: Option<&str>) -> Self {
        Self {
            series: series.into(),
            cloud: cloud.map(ToOwned::to_owned),
            variant: None,
        }
    }

    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    fn selector_value(&self, key: &str) -> Option<&str> {
        match key {
            "series" => Some(self.series.as_str()),
            "cloud" => self.cloud.as_deref(),
            "variant" => self.variant.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("expected an entitlement access document with an `entitlement` object")]
    MissingEntitlement,
}

/// Weight of `selector` in `ctx`, or 0 when any selector key fails to match.
#[must_use]
pub fn override_weight(selector: &Map<String, Value>, ctx: &PlatformContext) -> u32 {
    let mut weight = 0;
    for (key, value) in selector {
        let Some(key_weight) = SELECTOR_WEIGHTS
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, weight)| *weight)
        else {
            return 0;
        };
        match (ctx.selector_value(key), value.as_str()) {
            (Some(current), Some(wanted)) if current == wanted => weight += key_weight,
            _ => return 0,
        }
    }
    weight
}

/// Collects the overrides that apply to `ctx`, sorted in application order.
///
/// The per-series map is consumed from `entitlement`. Entries with equal
/// weight are ordered by their canonical JSON so list position never matters.
pub fn select_overrides(
    entitlement: &mut Map<String, Value>,
    ctx: &PlatformContext,
) -> Vec<(u32, Map<String, Value>)> {
    let mut selected = Vec::new();

    if let Some(Value::Object(mut by_series)) = entitlement.remove("series") {
        if let Some(Value::Object(patch)) = by_series.remove(&ctx.series) {
            if !patch.is_empty() {
                selected.push((SERIES_MAP_WEIGHT, patch));
            }
        }
    }

    if let Some(Value::Array(overrides)) = entitlement.get("overrides") {
        for entry in overrides {
            let Some(entry) = entry.as_object() else {
                debug!(%entry, "ignoring override that is not an object");
                continue;
            };
            let Some(selector) = entry.get("selector").and_then(Value::as_object) else {
                debug!("ignoring override without a selector");
                continue;
            };
            let weight = override_weight(selector, ctx);
            if weight == 0 {
                continue;
            }
            let mut patch = entry.clone();
            patch.remove("selector");
            selected.push((weight, patch));
        }
    }

    selected.sort_by_cached_key(|(weight, patch)| (*weight, canonical_json(patch)));
    selected
}

/// Resolves overrides in place on an access document (`{"entitlement": {...}}`).
pub fn apply_contract_overrides(
    access: &mut Value,
    ctx: &PlatformContext,
) -> Result<(), OverrideError> {
    let entitlement = access
        .get_mut("entitlement")
        .and_then(Value::as_object_mut)
        .ok_or(OverrideError::MissingEntitlement)?;

    for (_weight, patch) in select_overrides(entitlement, ctx) {
        for (key, value) in patch {
            let replacement = match (entitlement.get_mut(&key), value) {
                (Some(Value::Object(current)), Value::Object(sub)) => {
                    current.extend(sub);
                    None
                }
                (_, value) => Some(value),
            };
            if let Some(value) = replacement {
                entitlement.insert(key, value);
            }
        }
    }
    Ok(())
}

fn canonical_json(map: &Map<String, Value>) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(&Value::Object(map.clone())).to_string()
}
