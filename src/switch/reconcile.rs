//! Switch Reconciliation
//!
//! Turns desired port membership into per-switch driver calls.
//!
//! A batch is validated as a whole before anything is dispatched: every port
//! must resolve to a known switch group and every change must suit the
//! port's kind. Ports are then grouped by switch. Each switch is driven under
//! its own lock, ports in order, stopping at the first failed call; distinct
//! switches are driven concurrently. Before each call the switch is observed
//! and changes it already reflects are skipped, so re-driving a batch is safe.

use super::topology::{SwitchHandle, SwitchTopology};
use crate::domain::ports::{PortChange, PortId, PortKind, VlanId, PORT_SEPARATOR};
use crate::error::{Error, Result, SwitchFailure};
use crate::metrics::{CallOutcome, ControlPlaneMetrics};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Reports
// =============================================================================

/// Result of a successfully reconciled batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Ports a call was issued and acknowledged for
    pub applied: Vec<String>,
    /// Ports already in the desired state
    pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
struct SwitchOutcome {
    applied: Vec<String>,
    skipped: Vec<String>,
    failure: Option<SwitchFailure>,
}

type CallError = (CallOutcome, String);

// =============================================================================
// Reconciler
// =============================================================================

/// Dispatch engine over a switch topology
pub struct Reconciler {
    topology: Arc<SwitchTopology>,
    call_timeout: Duration,
    metrics: Option<Arc<ControlPlaneMetrics>>,
}

impl Reconciler {
    pub fn new(topology: Arc<SwitchTopology>, call_timeout: Duration) -> Self {
        Self {
            topology,
            call_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ControlPlaneMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn topology(&self) -> &Arc<SwitchTopology> {
        &self.topology
    }

    /// Translate a `port -> vlan | none` mapping into port changes
    ///
    /// Access ports are exclusively assigned or cleared. Trunk ports gain the
    /// VLAN, or lose every VLAN when the entry is `None`.
    pub fn plan(
        &self,
        desired: &BTreeMap<String, Option<VlanId>>,
    ) -> Result<Vec<(PortId, PortChange)>> {
        desired
            .iter()
            .map(|(port, vlan)| {
                let port: PortId = port.parse()?;
                let change = match (self.topology.kind(&port), vlan) {
                    (PortKind::Access, Some(vlan)) => PortChange::Assign(*vlan),
                    (PortKind::Trunk, Some(vlan)) => PortChange::Add(*vlan),
                    (_, None) => PortChange::Clear,
                };
                Ok((port, change))
            })
            .collect()
    }

    /// Apply a desired `port -> vlan | none` mapping
    ///
    /// Ports not named keep their current membership.
    pub async fn apply_networking(
        &self,
        desired: &BTreeMap<String, Option<VlanId>>,
    ) -> Result<ReconcileReport> {
        let changes = self.plan(desired)?;
        self.apply_changes(changes).await
    }

    /// Apply a batch of port changes
    pub async fn apply_changes(
        &self,
        changes: Vec<(PortId, PortChange)>,
    ) -> Result<ReconcileReport> {
        let total = changes.len();
        let mut batches: BTreeMap<String, (Arc<SwitchHandle>, Vec<(PortId, PortChange)>)> =
            BTreeMap::new();

        for (port, change) in changes {
            let (handle, kind) = self.topology.resolve(&port)?;
            if !change.valid_for(kind) {
                return Err(Error::BadArgument(format!(
                    "cannot {} on {} port {}",
                    change, kind, port
                )));
            }
            batches
                .entry(handle.name().to_string())
                .or_insert_with(|| (Arc::clone(handle), Vec::new()))
                .1
                .push((port, change));
        }

        if batches.is_empty() {
            return Ok(ReconcileReport::default());
        }

        debug!(
            "Dispatching {} port change(s) to switches {:?}",
            total,
            batches.keys().collect::<Vec<_>>()
        );

        let outcomes = join_all(
            batches
                .into_values()
                .map(|(handle, batch)| self.dispatch(handle, batch)),
        )
        .await;

        let mut report = ReconcileReport::default();
        let mut failures = Vec::new();
        for outcome in outcomes {
            report.applied.extend(outcome.applied);
            report.skipped.extend(outcome.skipped);
            failures.extend(outcome.failure);
        }

        if failures.is_empty() {
            info!(
                "Reconciled {} port(s), {} already in place",
                report.applied.len(),
                report.skipped.len()
            );
            Ok(report)
        } else {
            Err(Error::SwitchApply {
                failures,
                committed: report.applied,
            })
        }
    }

    /// Drive one switch through its ports in order
    async fn dispatch(
        &self,
        handle: Arc<SwitchHandle>,
        batch: Vec<(PortId, PortChange)>,
    ) -> SwitchOutcome {
        let _guard = handle.lock().await;
        let driver = handle.driver();
        let mut outcome = SwitchOutcome::default();

        for (port, change) in batch {
            let needed = match change {
                PortChange::Clear => Ok(true),
                PortChange::Assign(vlan) | PortChange::Add(vlan) => self
                    .bounded(driver.get_members(vlan))
                    .await
                    .map(|members| !members.contains(port.port())),
                PortChange::Remove(vlan) => self
                    .bounded(driver.get_members(vlan))
                    .await
                    .map(|members| members.contains(port.port())),
            };

            let result = match needed {
                Ok(false) => {
                    self.record(handle.name(), CallOutcome::Skipped);
                    outcome.skipped.push(port.to_string());
                    continue;
                }
                Ok(true) => self.bounded(driver.apply(port.port(), change)).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.record(handle.name(), CallOutcome::Ok);
                    debug!("Switch {} applied {} to {}", handle.name(), change, port);
                    outcome.applied.push(port.to_string());
                }
                Err((call_outcome, reason)) => {
                    self.record(handle.name(), call_outcome);
                    warn!(
                        "Switch {} failed {} on {}: {}",
                        handle.name(),
                        change,
                        port,
                        reason
                    );
                    outcome.failure = Some(SwitchFailure {
                        switch: handle.name().to_string(),
                        port: port.to_string(),
                        reason,
                    });
                    break;
                }
            }
        }

        outcome
    }

    /// Current members of each VLAN across every switch, sorted
    pub async fn get_switch_vlans(
        &self,
        vlans: &[VlanId],
    ) -> Result<BTreeMap<VlanId, Vec<String>>> {
        let queries = self.topology.switches().map(|handle| async move {
            let _guard = handle.lock().await;
            let mut found = Vec::with_capacity(vlans.len());
            for vlan in vlans {
                let members = self
                    .bounded(handle.driver().get_members(*vlan))
                    .await
                    .map_err(|(_, reason)| SwitchFailure {
                        switch: handle.name().to_string(),
                        port: format!("{}{}*", handle.name(), PORT_SEPARATOR),
                        reason,
                    })?;
                found.push((*vlan, members));
            }
            Ok::<_, SwitchFailure>((handle.name().to_string(), found))
        });

        let mut merged: BTreeMap<VlanId, BTreeSet<String>> =
            vlans.iter().map(|vlan| (*vlan, BTreeSet::new())).collect();
        let mut failures = Vec::new();

        for result in join_all(queries).await {
            match result {
                Ok((switch, found)) => {
                    for (vlan, members) in found {
                        let ports = merged.entry(vlan).or_default();
                        ports.extend(
                            members
                                .into_iter()
                                .map(|port| PortId::new(switch.clone(), port).to_string()),
                        );
                    }
                }
                Err(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            return Err(Error::SwitchApply {
                failures,
                committed: Vec::new(),
            });
        }

        Ok(merged
            .into_iter()
            .map(|(vlan, ports)| (vlan, ports.into_iter().collect()))
            .collect())
    }

    /// Reachability of every switch
    pub async fn health(&self) -> BTreeMap<String, bool> {
        let checks = self.topology.switches().map(|handle| async move {
            let healthy = matches!(self.bounded(handle.driver().health_check()).await, Ok(true));
            (handle.name().to_string(), healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, CallError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err((CallOutcome::Failed, e.to_string())),
            Err(_) => Err((
                CallOutcome::TimedOut,
                format!("timed out after {:?}", self.call_timeout),
            )),
        }
    }

    fn record(&self, switch: &str, outcome: CallOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_switch_call(switch, outcome);
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("topology", &self.topology)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SwitchDriverRef;
    use crate::switch::TestSwitch;
    use assert_matches::assert_matches;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    fn setup(trunks: &[&str], timeout: Duration) -> (Reconciler, Vec<Arc<TestSwitch>>) {
        let switches: Vec<Arc<TestSwitch>> = (0..3).map(|_| Arc::new(TestSwitch::new())).collect();
        let mut topology =
            SwitchTopology::new(trunks.iter().map(|p| p.parse::<PortId>().unwrap()));
        for (i, switch) in switches.iter().enumerate() {
            topology = topology.with_switch(i.to_string(), switch.clone() as SwitchDriverRef);
        }
        (Reconciler::new(Arc::new(topology), timeout), switches)
    }

    fn desired(entries: &[(&str, Option<u16>)]) -> BTreeMap<String, Option<VlanId>> {
        entries
            .iter()
            .map(|(port, id)| (port.to_string(), id.map(vlan)))
            .collect()
    }

    fn calls(switches: &[Arc<TestSwitch>]) -> u64 {
        switches.iter().map(|s| s.applied_calls()).sum()
    }

    #[tokio::test]
    async fn test_apply_networking_routes_to_switches() {
        let (reconciler, switches) = setup(&[], Duration::from_secs(5));
        let both = [vlan(84), vlan(85)];

        reconciler
            .apply_networking(&desired(&[
                ("1::1", Some(84)),
                ("1::2", Some(84)),
                ("2::1", Some(84)),
            ]))
            .await
            .unwrap();

        let vlans = reconciler.get_switch_vlans(&both).await.unwrap();
        assert_eq!(vlans[&vlan(84)], vec!["1::1", "1::2", "2::1"]);
        assert!(vlans[&vlan(85)].is_empty());
        assert_eq!(switches[0].applied_calls(), 0);

        reconciler
            .apply_networking(&desired(&[
                ("1::2", Some(85)),
                ("2::1", None),
                ("0::2", Some(85)),
            ]))
            .await
            .unwrap();

        let vlans = reconciler.get_switch_vlans(&both).await.unwrap();
        assert_eq!(vlans[&vlan(84)], vec!["1::1"]);
        assert_eq!(vlans[&vlan(85)], vec!["0::2", "1::2"]);
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let (reconciler, switches) = setup(&[], Duration::from_secs(5));
        let batch = desired(&[("1::1", Some(84)), ("2::1", Some(85))]);

        let first = reconciler.apply_networking(&batch).await.unwrap();
        assert_eq!(first.applied.len(), 2);
        let before = calls(&switches);

        let second = reconciler.apply_networking(&batch).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec!["1::1", "2::1"]);
        assert_eq!(calls(&switches), before);
    }

    #[tokio::test]
    async fn test_trunk_membership_is_additive() {
        let (reconciler, switches) = setup(&["1::up"], Duration::from_secs(5));

        reconciler
            .apply_networking(&desired(&[("1::up", Some(84))]))
            .await
            .unwrap();
        reconciler
            .apply_networking(&desired(&[("1::up", Some(85))]))
            .await
            .unwrap();
        assert_eq!(switches[1].vlans_of("up").len(), 2);

        reconciler
            .apply_changes(vec![(PortId::new("1", "up"), PortChange::Remove(vlan(84)))])
            .await
            .unwrap();
        assert_eq!(switches[1].vlans_of("up"), [vlan(85)].into_iter().collect());

        reconciler
            .apply_networking(&desired(&[("1::up", None)]))
            .await
            .unwrap();
        assert!(switches[1].vlans_of("up").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_batches_dispatch_nothing() {
        let (reconciler, switches) = setup(&["1::up"], Duration::from_secs(5));

        assert_matches!(
            reconciler
                .apply_networking(&desired(&[("0::1", Some(84)), ("7::1", Some(84))]))
                .await,
            Err(Error::Configuration(_))
        );
        assert_matches!(
            reconciler.apply_networking(&desired(&[("bogus", Some(84))])).await,
            Err(Error::BadArgument(_))
        );
        assert_matches!(
            reconciler
                .apply_changes(vec![(PortId::new("1", "up"), PortChange::Assign(vlan(84)))])
                .await,
            Err(Error::BadArgument(_))
        );
        assert_matches!(
            reconciler
                .apply_changes(vec![(PortId::new("1", "1"), PortChange::Add(vlan(84)))])
                .await,
            Err(Error::BadArgument(_))
        );
        assert_eq!(calls(&switches), 0);
    }

    #[tokio::test]
    async fn test_failure_stops_switch_but_not_others() {
        let (reconciler, switches) = setup(&[], Duration::from_secs(5));
        switches[1].fail_port("2", "port down");

        let batch = desired(&[
            ("0::1", Some(84)),
            ("1::1", Some(84)),
            ("1::2", Some(84)),
            ("1::3", Some(84)),
            ("2::1", Some(84)),
        ]);

        let err = reconciler.apply_networking(&batch).await.unwrap_err();
        assert!(err.is_retryable());
        let (failures, committed) = match err {
            Error::SwitchApply {
                failures,
                committed,
            } => (failures, committed),
            other => panic!("unexpected error: {}", other),
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].switch, "1");
        assert_eq!(failures[0].port, "1::2");
        assert_eq!(failures[0].reason, "Internal error: port down");
        assert_eq!(committed, vec!["0::1", "1::1", "2::1"]);
        assert!(switches[1].vlans_of("3").is_empty());

        switches[1].clear_faults();
        let report = reconciler.apply_networking(&batch).await.unwrap();
        assert_eq!(report.applied, vec!["1::2", "1::3"]);
        assert_eq!(report.skipped.len(), 3);
    }

    #[tokio::test]
    async fn test_slow_switch_times_out() {
        let (reconciler, switches) = setup(&[], Duration::from_millis(50));
        switches[2].set_delay(Some(Duration::from_millis(500)));

        let result = reconciler
            .apply_networking(&desired(&[("0::1", Some(84)), ("2::1", Some(84))]))
            .await;

        assert_matches!(result, Err(Error::SwitchApply { failures, committed }) => {
            assert_eq!(failures[0].switch, "2");
            assert!(failures[0].reason.contains("timed out"));
            assert_eq!(committed, vec!["0::1"]);
        });
    }

    #[tokio::test]
    async fn test_health() {
        let (reconciler, _switches) = setup(&[], Duration::from_secs(5));
        let health = reconciler.health().await;
        assert_eq!(health.len(), 3);
        assert!(health.values().all(|healthy| *healthy));
    }
}
