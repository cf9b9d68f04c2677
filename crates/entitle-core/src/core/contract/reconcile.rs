//! Applies the difference between two contract snapshots to local services.
//!
//! Services are visited in dependency order so a prerequisite is settled
//! before anything that requires it. A failure on one service is recorded and
//! processing continues; the aggregate failure is reported at the end.

use std::collections::BTreeMap;

use entitle_domain::{apply_contract_overrides, dict_deltas, Delta, DeltaMap, PlatformContext};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::entitlement::{ApplicationStatus, Entitlement, EntitlementFactory, ServiceError};

/// Per-service access documents keyed by service name.
pub type AccessMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Old and new access documents are identical.
    Unchanged,
    /// Something changed but no transition was required.
    Updated,
    Disabled,
    AlreadyDisabled,
    /// Entitlement was lost but disabling failed; the service is still active.
    DisableFailed {
        warning: String,
    },
    Enabled,
    EnableRecommended {
        message: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
        unexpected: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("unexpected error while processing services: {}", .failed_services.join(", "))]
    Unexpected { failed_services: Vec<String> },
    #[error("failed to process default services: {}", .failed_services.join(", "))]
    DefaultServicesFailed { failed_services: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileResult {
    /// Outcomes in the order services were visited.
    pub outcomes: IndexMap<String, ServiceOutcome>,
    pub failure: Option<ReconcileError>,
}

impl ReconcileResult {
    #[must_use]
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes.get(service)
    }

    /// Disable failures, which are reported but do not fail the operation.
    #[must_use]
    pub fn warnings(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                ServiceOutcome::DisableFailed { warning } => Some((name.as_str(), warning.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn into_result(self) -> Result<IndexMap<String, ServiceOutcome>, ReconcileError> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.outcomes),
        }
    }
}

/// Reconciles every known service from `old` to `new`.
pub fn reconcile(
    factory: &dyn EntitlementFactory,
    old: &AccessMap,
    new: &AccessMap,
    ctx: &PlatformContext,
    allow_enable: bool,
) -> ReconcileResult {
    let empty = Value::Object(Map::new());
    let mut result = ReconcileResult::default();
    let mut failed_services = Vec::new();
    let mut unexpected = false;

    for name in factory.graph().enable_order() {
        let Some(new_access) = new.get(name) else {
            continue;
        };
        let orig_access = old.get(name).unwrap_or(&empty);
        let outcome =
            match process_entitlement_delta(factory, orig_access, new_access, ctx, allow_enable) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let is_unexpected = err.is_unexpected();
                    if is_unexpected {
                        error!(service = %name, error = ?err, "unexpected error processing contract delta");
                        unexpected = true;
                    } else {
                        error!(service = %name, %err, "failed to process contract delta");
                    }
                    failed_services.push(name.clone());
                    ServiceOutcome::Failed {
                        error: err.to_string(),
                        unexpected: is_unexpected,
                    }
                }
            };
        result.outcomes.insert(name.clone(), outcome);
    }

    if !failed_services.is_empty() {
        result.failure = Some(if unexpected {
            ReconcileError::Unexpected { failed_services }
        } else {
            ReconcileError::DefaultServicesFailed { failed_services }
        });
    }
    result
}

/// Resolves overrides on `new_access`, diffs it against `orig_access` and
/// drives the resulting transition for one service.
pub fn process_entitlement_delta(
    factory: &dyn EntitlementFactory,
    orig_access: &Value,
    new_access: &Value,
    ctx: &PlatformContext,
    allow_enable: bool,
) -> Result<ServiceOutcome, ServiceError> {
    let mut resolved = new_access.clone();
    apply_contract_overrides(&mut resolved, ctx)
        .map_err(|err| ServiceError::UserFacing(format!("invalid contract data: {err}")))?;

    let deltas = dict_deltas(orig_access, &resolved);
    if deltas.is_empty() {
        return Ok(ServiceOutcome::Unchanged);
    }

    let Some(name) = service_type(orig_access, &deltas) else {
        return Err(ServiceError::UserFacing(format!(
            "could not determine contract delta service type {orig_access} {resolved}"
        )));
    };
    let mut entitlement = match factory.entitlement(&name, allow_enable) {
        Ok(entitlement) => entitlement,
        Err(err) => {
            debug!(service = %name, "skipping entitlement deltas; no such service");
            return Ok(ServiceOutcome::Skipped {
                reason: err.to_string(),
            });
        }
    };
    process_contract_deltas(entitlement.as_mut(), orig_access, &deltas, allow_enable)
}

fn process_contract_deltas(
    entitlement: &mut dyn Entitlement,
    orig_access: &Value,
    deltas: &DeltaMap,
    allow_enable: bool,
) -> Result<ServiceOutcome, ServiceError> {
    let name = entitlement.name().to_string();
    let entitlement_delta = deltas.get("entitlement");

    if transitions_to_unentitled(entitlement_delta) {
        if entitlement.application_status()? == ApplicationStatus::Disabled {
            debug!(service = %name, "entitlement lost; service already disabled");
            return Ok(ServiceOutcome::AlreadyDisabled);
        }
        return Ok(match entitlement.disable() {
            Ok(()) => {
                info!(service = %name, "service disabled after contract refresh");
                ServiceOutcome::Disabled
            }
            Err(err) => {
                warn!(service = %name, %err, "unable to disable unentitled service");
                ServiceOutcome::DisableFailed {
                    warning: format!(
                        "Unable to disable '{name}' as recommended during contract refresh: {err}"
                    ),
                }
            }
        });
    }

    let enable_by_default = entitlement_delta
        .and_then(|delta| delta.child("obligations"))
        .and_then(|delta| delta.child("enableByDefault"))
        == Some(Delta::Set(Value::Bool(true)));
    if enable_by_default && has_resource_token(orig_access, deltas) && entitlement.can_enable()? {
        if allow_enable {
            info!(service = %name, "Enabling default service {name}");
            entitlement.enable()?;
            return Ok(ServiceOutcome::Enabled);
        }
        let message = format!("Service {name} is recommended by default. Run: sudo pro enable {name}");
        info!(service = %name, "{message}");
        return Ok(ServiceOutcome::EnableRecommended { message });
    }
    Ok(ServiceOutcome::Updated)
}

/// Loss of the whole `entitlement` object, removal of `entitled`, or a change
/// of `entitled` to `false`.
fn transitions_to_unentitled(delta: Option<&Delta>) -> bool {
    match delta {
        None => false,
        Some(Delta::Removed) => true,
        Some(delta) => matches!(
            delta.child("entitled"),
            Some(Delta::Removed | Delta::Set(Value::Bool(false)))
        ),
    }
}

fn has_resource_token(orig_access: &Value, deltas: &DeltaMap) -> bool {
    let non_empty = |token: &str| !token.trim().is_empty();
    orig_access
        .get("resourceToken")
        .and_then(Value::as_str)
        .is_some_and(non_empty)
        || deltas
            .get("resourceToken")
            .and_then(Delta::as_value)
            .and_then(Value::as_str)
            .is_some_and(non_empty)
}

fn service_type(orig_access: &Value, deltas: &DeltaMap) -> Option<String> {
    orig_access
        .get("entitlement")
        .and_then(|entitlement| entitlement.get("type"))
        .and_then(Value::as_str)
        .filter(|kind| !kind.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            deltas
                .get("entitlement")
                .and_then(|delta| delta.child("type"))
                .and_then(|delta| delta.as_value().and_then(Value::as_str).map(str::to_owned))
        })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use entitle_domain::{ServiceGraph, ServiceSpec};
    use serde_json::json;

    use super::*;
    use crate::core::contract::entitlement::EntitlementNotFoundError;

    #[derive(Clone)]
    struct ServiceState {
        status: ApplicationStatus,
        can_enable: bool,
        enable_error: Option<fn() -> ServiceError>,
        disable_error: Option<fn() -> ServiceError>,
    }

    impl Default for ServiceState {
        fn default() -> Self {
            Self {
                status: ApplicationStatus::Disabled,
                can_enable: true,
                enable_error: None,
                disable_error: None,
            }
        }
    }

    struct FakeFactory {
        graph: ServiceGraph,
        services: HashMap<String, ServiceState>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeFactory {
        fn new() -> Self {
            let graph = ServiceGraph::new(&[
                ServiceSpec::new("ros-updates", &["esm-apps", "esm-infra", "ros"]),
                ServiceSpec::new("ros", &["esm-apps", "esm-infra"]),
                ServiceSpec::new("esm-infra", &[]),
                ServiceSpec::new("esm-apps", &[]),
                ServiceSpec::new("livepatch", &[]),
                ServiceSpec::new("ghost", &[]),
            ])
            .unwrap();
            let services = ["ros-updates", "ros", "esm-infra", "esm-apps", "livepatch"]
                .into_iter()
                .map(|name| (name.to_string(), ServiceState::default()))
                .collect();
            Self {
                graph,
                services,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn set(&mut self, name: &str, state: ServiceState) {
            self.services.insert(name.to_string(), state);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    struct FakeEntitlement<'a> {
        name: String,
        state: ServiceState,
        calls: &'a RefCell<Vec<String>>,
    }

    impl Entitlement for FakeEntitlement<'_> {
        fn name(&self) -> &str {
            &self.name
        }

        fn application_status(&self) -> Result<ApplicationStatus, ServiceError> {
            Ok(self.state.status)
        }

        fn can_enable(&self) -> Result<bool, ServiceError> {
            Ok(self.state.can_enable)
        }

        fn enable(&mut self) -> Result<(), ServiceError> {
            self.calls.borrow_mut().push(format!("enable:{}", self.name));
            match self.state.enable_error {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        fn disable(&mut self) -> Result<(), ServiceError> {
            self.calls.borrow_mut().push(format!("disable:{}", self.name));
            match self.state.disable_error {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    impl EntitlementFactory for FakeFactory {
        fn graph(&self) -> &ServiceGraph {
            &self.graph
        }

        fn entitlement(
            &self,
            name: &str,
            _assume_yes: bool,
        ) -> Result<Box<dyn Entitlement + '_>, EntitlementNotFoundError> {
            let state = self
                .services
                .get(name)
                .cloned()
                .ok_or_else(|| EntitlementNotFoundError(name.to_string()))?;
            Ok(Box::new(FakeEntitlement {
                name: name.to_string(),
                state,
                calls: &self.calls,
            }))
        }
    }

    fn access(name: &str, entitled: bool, enable_by_default: bool) -> Value {
        json!({
            "entitlement": {
                "type": name,
                "entitled": entitled,
                "obligations": {"enableByDefault": enable_by_default},
                "directives": {"aptURL": format!("https://{name}.example.com")}
            },
            "resourceToken": format!("token-{name}")
        })
    }

    fn ctx() -> PlatformContext {
        PlatformContext::new("jammy", Some("aws"))
    }

    fn snapshot(entries: &[(&str, Value)]) -> AccessMap {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    fn user_facing() -> ServiceError {
        ServiceError::UserFacing("apt failed".into())
    }

    fn unexpected() -> ServiceError {
        ServiceError::Unexpected(anyhow::anyhow!("kaboom"))
    }

    #[test]
    fn identical_snapshots_cause_no_side_effects() {
        let factory = FakeFactory::new();
        let old = snapshot(&[
            ("esm-infra", access("esm-infra", true, true)),
            ("livepatch", access("livepatch", false, false)),
        ]);
        let result = reconcile(&factory, &old, &old.clone(), &ctx(), true);
        assert!(factory.calls().is_empty());
        assert!(result.failure.is_none());
        assert!(result
            .outcomes
            .values()
            .all(|outcome| *outcome == ServiceOutcome::Unchanged));
    }

    #[test]
    fn dropped_entitled_key_disables_and_tolerates_disable_failure() {
        let mut factory = FakeFactory::new();
        factory.set(
            "livepatch",
            ServiceState {
                status: ApplicationStatus::Enabled,
                disable_error: Some(user_facing),
                ..ServiceState::default()
            },
        );
        let old = snapshot(&[("livepatch", access("livepatch", true, false))]);
        let mut dropped = access("livepatch", true, false);
        dropped["entitlement"]
            .as_object_mut()
            .unwrap()
            .remove("entitled");
        let new = snapshot(&[("livepatch", dropped)]);

        let result = reconcile(&factory, &old, &new, &ctx(), false);
        assert_eq!(factory.calls(), vec!["disable:livepatch"]);
        assert!(matches!(
            result.outcome("livepatch"),
            Some(ServiceOutcome::DisableFailed { .. })
        ));
        assert_eq!(result.warnings().len(), 1);
        assert!(result.failure.is_none());
    }

    #[test]
    fn explicit_false_on_disabled_service_is_a_no_op() {
        let factory = FakeFactory::new();
        let old = snapshot(&[("esm-apps", access("esm-apps", true, false))]);
        let new = snapshot(&[("esm-apps", access("esm-apps", false, false))]);
        let result = reconcile(&factory, &old, &new, &ctx(), true);
        assert!(factory.calls().is_empty());
        assert_eq!(
            result.outcome("esm-apps"),
            Some(&ServiceOutcome::AlreadyDisabled)
        );
    }

    #[test]
    fn enable_by_default_without_permission_only_recommends() {
        let factory = FakeFactory::new();
        let old = snapshot(&[("esm-infra", access("esm-infra", true, false))]);
        let new = snapshot(&[("esm-infra", access("esm-infra", true, true))]);
        let result = reconcile(&factory, &old, &new, &ctx(), false);
        assert!(factory.calls().is_empty());
        assert_eq!(
            result.outcome("esm-infra"),
            Some(&ServiceOutcome::EnableRecommended {
                message: "Service esm-infra is recommended by default. Run: sudo pro enable esm-infra"
                    .into()
            })
        );
        assert!(result.failure.is_none());
    }

    #[test]
    fn enable_by_default_requires_a_resource_token() {
        let factory = FakeFactory::new();
        let mut tokenless = access("esm-infra", true, true);
        tokenless.as_object_mut().unwrap().remove("resourceToken");
        let mut old = access("esm-infra", true, false);
        old.as_object_mut().unwrap().remove("resourceToken");
        let result = reconcile(
            &factory,
            &snapshot(&[("esm-infra", old)]),
            &snapshot(&[("esm-infra", tokenless)]),
            &ctx(),
            true,
        );
        assert!(factory.calls().is_empty());
        assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Updated));
    }

    #[test]
    fn enables_in_dependency_order() {
        let factory = FakeFactory::new();
        let names = ["ros-updates", "ros", "esm-apps", "esm-infra"];
        let old: AccessMap = names
            .iter()
            .map(|name| ((*name).to_string(), access(name, true, false)))
            .collect();
        let new: AccessMap = names
            .iter()
            .map(|name| ((*name).to_string(), access(name, true, true)))
            .collect();

        let result = reconcile(&factory, &old, &new, &ctx(), true);
        assert_eq!(
            factory.calls(),
            vec![
                "enable:esm-infra",
                "enable:esm-apps",
                "enable:ros",
                "enable:ros-updates"
            ]
        );
        assert!(result
            .outcomes
            .values()
            .all(|outcome| *outcome == ServiceOutcome::Enabled));
    }

    #[test]
    fn failures_are_contained_and_aggregated() {
        let mut factory = FakeFactory::new();
        factory.set(
            "esm-apps",
            ServiceState {
                enable_error: Some(user_facing),
                ..ServiceState::default()
            },
        );
        let old = snapshot(&[
            ("esm-apps", access("esm-apps", true, false)),
            ("esm-infra", access("esm-infra", true, false)),
        ]);
        let new = snapshot(&[
            ("esm-apps", access("esm-apps", true, true)),
            ("esm-infra", access("esm-infra", true, true)),
        ]);
        let result = reconcile(&factory, &old, &new, &ctx(), true);
        assert_eq!(factory.calls(), vec!["enable:esm-infra", "enable:esm-apps"]);
        assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Enabled));
        assert_eq!(
            result.failure,
            Some(ReconcileError::DefaultServicesFailed {
                failed_services: vec!["esm-apps".into()]
            })
        );

        factory.set(
            "esm-infra",
            ServiceState {
                enable_error: Some(unexpected),
                ..ServiceState::default()
            },
        );
        let result = reconcile(&factory, &old, &new, &ctx(), true);
        let err = result.into_result().unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Unexpected {
                failed_services: vec!["esm-infra".into(), "esm-apps".into()]
            }
        );
    }

    #[test]
    fn unknown_service_type_is_skipped() {
        let factory = FakeFactory::new();
        let new = snapshot(&[("ghost", access("ghost", true, true))]);
        let result = reconcile(&factory, &AccessMap::new(), &new, &ctx(), true);
        assert!(matches!(
            result.outcome("ghost"),
            Some(ServiceOutcome::Skipped { .. })
        ));
        assert!(result.failure.is_none());
    }

    #[test]
    fn malformed_access_document_is_recorded_against_the_service() {
        let factory = FakeFactory::new();
        let new = snapshot(&[
            ("esm-apps", json!({"resourceToken": "tok"})),
            ("esm-infra", access("esm-infra", true, false)),
        ]);
        let result = reconcile(&factory, &AccessMap::new(), &new, &ctx(), true);
        assert!(matches!(
            result.outcome("esm-apps"),
            Some(ServiceOutcome::Failed {
                unexpected: false,
                ..
            })
        ));
        assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Updated));
        assert!(matches!(
            result.failure,
            Some(ReconcileError::DefaultServicesFailed { .. })
        ));
    }

    #[test]
    fn overrides_are_resolved_before_diffing() {
        let factory = FakeFactory::new();
        let old = snapshot(&[("esm-infra", access("esm-infra", true, false))]);
        let mut new = access("esm-infra", true, false);
        new["entitlement"]["overrides"] = json!([
            {"selector": {"cloud": "aws"}, "obligations": {"enableByDefault": true}}
        ]);
        let result = reconcile(
            &factory,
            &old,
            &snapshot(&[("esm-infra", new)]),
            &ctx(),
            true,
        );
        assert_eq!(factory.calls(), vec!["enable:esm-infra"]);
        assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Enabled));
    }
}
