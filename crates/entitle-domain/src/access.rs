use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typed view of one `resourceEntitlements` entry.
///
/// Keys this crate does not model are kept in `extra` so a round trip never
/// drops contract data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementAccess {
    #[serde(default)]
    pub entitled: bool,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub affordances: Affordances,
    #[serde(default)]
    pub obligations: Obligations,
    #[serde(default)]
    pub directives: Directives,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntitlementAccess {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affordances {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub kernel_flavors: Vec<String>,
    #[serde(default)]
    pub min_kernel_version: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub support_level: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligations {
    #[serde(default)]
    pub enable_by_default: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Directives {
    #[serde(rename = "aptURL", default)]
    pub apt_url: Option<String>,
    #[serde(default)]
    pub suites: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A sparse patch selected by platform context.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Override {
    #[serde(default)]
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affordances: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obligations: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}
