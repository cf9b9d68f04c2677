use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::overrides::{apply_contract_overrides, PlatformContext};

/// Machine-wide contract document as issued by the contract server.
///
/// Replaced wholesale after every successful fetch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineContract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_token: Option<String>,
    #[serde(default)]
    pub machine_token_info: MachineTokenInfo,
    #[serde(default)]
    pub resource_tokens: Vec<ResourceToken>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTokenInfo {
    #[serde(default)]
    pub contract_info: ContractInfo,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub resource_entitlements: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceToken {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
}

impl MachineContract {
    /// Per-service access documents (`{"entitlement": .., "resourceToken": ..}`)
    /// keyed by service type, with overrides for `ctx` already resolved.
    ///
    /// Only entries without a `type` are skipped; anything else malformed is
    /// left for the reconciler to record against that service.
    #[must_use]
    pub fn entitlement_accesses(&self, ctx: &PlatformContext) -> BTreeMap<String, Value> {
        let tokens: HashMap<&str, &str> = self
            .resource_tokens
            .iter()
            .map(|token| (token.kind.as_str(), token.token.as_str()))
            .collect();

        let mut accesses = BTreeMap::new();
        for raw in &self.machine_token_info.contract_info.resource_entitlements {
            let Some(kind) = raw
                .get("type")
                .and_then(Value::as_str)
                .filter(|kind| !kind.is_empty())
                .map(str::to_owned)
            else {
                warn!(entry = %raw, "skipping resource entitlement without a type");
                continue;
            };
            let mut access = json!({ "entitlement": raw.clone() });
            if let Some(token) = tokens.get(kind.as_str()) {
                access["resourceToken"] = json!(token);
            }
            if let Err(err) = apply_contract_overrides(&mut access, ctx) {
                warn!(%err, service = %kind, "failed to resolve overrides");
            }
            accesses.insert(kind, access);
        }
        accesses
    }
}
