use std::cell::RefCell;
use std::sync::Arc;

use entitle_core::contract::{ApplicationStatus, EntitlementNotFoundError, RefreshError, ServiceError};
use entitle_core::{
    refresh_contract, Config, ContractSource, Entitlement, EntitlementFactory, LockManager,
    MachineContract, PlatformContext, ProcessProbe, ServiceGraph, ServiceOutcome,
};
use serde_json::json;
use tempfile::tempdir;

struct LiveProbe;

impl ProcessProbe for LiveProbe {
    fn is_alive(&self, _pid: i32) -> bool {
        true
    }

    fn is_privileged(&self) -> bool {
        false
    }
}

struct StaticSource(MachineContract);

impl ContractSource for StaticSource {
    fn fetch_contract(
        &self,
        _current: Option<&MachineContract>,
    ) -> anyhow::Result<MachineContract> {
        Ok(self.0.clone())
    }
}

struct Recorder {
    graph: ServiceGraph,
    enabled: Vec<&'static str>,
    calls: RefCell<Vec<String>>,
}

struct Service<'a> {
    name: String,
    enabled: bool,
    calls: &'a RefCell<Vec<String>>,
}

impl Entitlement for Service<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn application_status(&self) -> Result<ApplicationStatus, ServiceError> {
        Ok(if self.enabled {
            ApplicationStatus::Enabled
        } else {
            ApplicationStatus::Disabled
        })
    }

    fn can_enable(&self) -> Result<bool, ServiceError> {
        Ok(!self.enabled)
    }

    fn enable(&mut self) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("enable:{}", self.name));
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("disable:{}", self.name));
        Ok(())
    }
}

impl EntitlementFactory for Recorder {
    fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    fn entitlement(
        &self,
        name: &str,
        _assume_yes: bool,
    ) -> Result<Box<dyn Entitlement + '_>, EntitlementNotFoundError> {
        if !self.graph.contains(name) {
            return Err(EntitlementNotFoundError(name.to_string()));
        }
        Ok(Box::new(Service {
            name: name.to_string(),
            enabled: self.enabled.contains(&name),
            calls: &self.calls,
        }))
    }
}

fn contract(entitlements: serde_json::Value, tokens: serde_json::Value) -> MachineContract {
    serde_json::from_value(json!({
        "machineToken": "m-token",
        "machineTokenInfo": {"contractInfo": {"id": "cid", "resourceEntitlements": entitlements}},
        "resourceTokens": tokens
    }))
    .unwrap()
}

#[test]
fn refresh_persists_contract_and_applies_transitions() {
    let tmp = tempdir().unwrap();
    let config = Config::rooted(tmp.path());
    let lock = LockManager::with_probe(&config, Arc::new(LiveProbe));
    let ctx = PlatformContext::new("noble", Some("azure"));
    let factory = Recorder {
        graph: ServiceGraph::with_default_catalog().unwrap(),
        enabled: vec!["livepatch"],
        calls: RefCell::new(Vec::new()),
    };

    let first = contract(
        json!([
            {"type": "livepatch", "entitled": true},
            {"type": "esm-infra", "entitled": true, "obligations": {"enableByDefault": false}}
        ]),
        json!([{"type": "esm-infra", "token": "t-infra"}]),
    );
    refresh_contract(config.paths(), &lock, &StaticSource(first.clone()), &factory, &ctx, true)
        .unwrap()
        .into_result()
        .unwrap();
    assert!(factory.calls.borrow().is_empty());

    let stored: MachineContract = serde_json::from_str(
        &std::fs::read_to_string(config.paths().machine_token_file()).unwrap(),
    )
    .unwrap();
    assert_eq!(stored, first);

    let second = contract(
        json!([
            {"type": "livepatch"},
            {"type": "esm-infra", "entitled": true,
             "overrides": [{"selector": {"series": "noble"}, "obligations": {"enableByDefault": true}}]}
        ]),
        json!([{"type": "esm-infra", "token": "t-infra"}]),
    );
    let result = refresh_contract(
        config.paths(),
        &lock,
        &StaticSource(second),
        &factory,
        &ctx,
        true,
    )
    .unwrap();
    assert!(result.failure.is_none());
    assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Enabled));
    assert_eq!(result.outcome("livepatch"), Some(&ServiceOutcome::Disabled));
    assert_eq!(
        *factory.calls.borrow(),
        vec!["enable:esm-infra".to_string(), "disable:livepatch".to_string()]
    );
    assert!(!lock.lock_path().exists());
}

#[test]
fn refresh_fails_fast_while_the_lock_is_held() {
    let tmp = tempdir().unwrap();
    let config = Config::rooted(tmp.path());
    let lock = LockManager::with_probe(&config, Arc::new(LiveProbe));
    let factory = Recorder {
        graph: ServiceGraph::with_default_catalog().unwrap(),
        enabled: Vec::new(),
        calls: RefCell::new(Vec::new()),
    };
    let _guard = lock.acquire("pro enable fips").unwrap();

    let err = refresh_contract(
        config.paths(),
        &lock,
        &StaticSource(MachineContract::default()),
        &factory,
        &PlatformContext::new("jammy", None),
        false,
    )
    .unwrap_err();
    match err {
        RefreshError::Lock(err) => {
            assert_eq!(err.held().map(|held| held.holder.as_str()), Some("pro enable fips"));
        }
        other => panic!("expected lock error, got {other:?}"),
    }
    assert!(!config.paths().machine_token_file().exists());
}

#[test]
fn malformed_override_still_reaches_the_reconciler() {
    let tmp = tempdir().unwrap();
    let config = Config::rooted(tmp.path());
    let lock = LockManager::with_probe(&config, Arc::new(LiveProbe));
    let factory = Recorder {
        graph: ServiceGraph::with_default_catalog().unwrap(),
        enabled: Vec::new(),
        calls: RefCell::new(Vec::new()),
    };
    let fetched = contract(
        json!([
            {"type": "esm-infra", "entitled": true,
             "obligations": {"enableByDefault": true},
             "overrides": [{"directives": {"aptURL": "https://nowhere"}}]}
        ]),
        json!([{"type": "esm-infra", "token": "t-infra"}]),
    );

    let result = refresh_contract(
        config.paths(),
        &lock,
        &StaticSource(fetched),
        &factory,
        &PlatformContext::new("jammy", None),
        true,
    )
    .unwrap();
    assert_eq!(result.outcome("esm-infra"), Some(&ServiceOutcome::Enabled));
    assert_eq!(*factory.calls.borrow(), vec!["enable:esm-infra".to_string()]);
}
