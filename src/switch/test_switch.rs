//! In-Memory Test Switch
//!
//! A switch driver keeping its port table in memory. Registered under the
//! driver type `test`; used by development configurations and the test
//! suites, which can inject per-port faults and call latency.

use crate::domain::ports::{PortChange, SwitchDriver, VlanId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Driver type name
pub const TEST_SWITCH_TYPE: &str = "test";

/// Switch whose port table lives in process memory
#[derive(Debug, Default)]
pub struct TestSwitch {
    /// Port name to VLAN membership
    ports: Mutex<BTreeMap<String, BTreeSet<VlanId>>>,
    /// Port name to injected `apply` failure reason
    faults: Mutex<BTreeMap<String, String>>,
    /// VLAN to injected `get_members` failure reason
    vlan_faults: Mutex<BTreeMap<VlanId, String>>,
    delay: Mutex<Option<Duration>>,
    applied: AtomicU64,
}

impl TestSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `apply` on `port` fail with `reason`
    pub fn fail_port(&self, port: impl Into<String>, reason: impl Into<String>) {
        self.faults.lock().insert(port.into(), reason.into());
    }

    /// Make every `get_members` query for `vlan` fail with `reason`
    pub fn fail_vlan(&self, vlan: VlanId, reason: impl Into<String>) {
        self.vlan_faults.lock().insert(vlan, reason.into());
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        self.vlan_faults.lock().clear();
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Number of `apply` calls that reached the port table
    pub fn applied_calls(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// VLANs the port is currently a member of
    pub fn vlans_of(&self, port: &str) -> BTreeSet<VlanId> {
        self.ports.lock().get(port).cloned().unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SwitchDriver for TestSwitch {
    fn driver_type(&self) -> &str {
        TEST_SWITCH_TYPE
    }

    async fn apply(&self, port: &str, change: PortChange) -> Result<()> {
        self.simulate_latency().await;

        if let Some(reason) = self.faults.lock().get(port) {
            return Err(Error::Internal(reason.clone()));
        }

        let mut ports = self.ports.lock();
        let vlans = ports.entry(port.to_string()).or_default();
        match change {
            PortChange::Assign(vlan) => {
                vlans.clear();
                vlans.insert(vlan);
            }
            PortChange::Clear => vlans.clear(),
            PortChange::Add(vlan) => {
                vlans.insert(vlan);
            }
            PortChange::Remove(vlan) => {
                vlans.remove(&vlan);
            }
        }
        if vlans.is_empty() {
            ports.remove(port);
        }
        drop(ports);

        self.applied.fetch_add(1, Ordering::Relaxed);
        trace!("test switch: {} {}", change, port);
        Ok(())
    }

    async fn get_members(&self, vlan: VlanId) -> Result<BTreeSet<String>> {
        self.simulate_latency().await;

        if let Some(reason) = self.vlan_faults.lock().get(&vlan) {
            return Err(Error::Internal(reason.clone()));
        }

        Ok(self
            .ports
            .lock()
            .iter()
            .filter(|(_, vlans)| vlans.contains(&vlan))
            .map(|(port, _)| port.clone())
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
