//! Switch Topology
//!
//! Maps switch group names to driver instances and classifies ports as
//! access or trunk. Built once at startup and read-only afterwards.

use super::DriverRegistry;
use crate::config::HaasConfig;
use crate::domain::ports::{PortId, PortKind, SwitchDriverRef};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A switch group and the driver serving it
pub struct SwitchHandle {
    name: String,
    driver: SwitchDriverRef,
    /// Serializes calls to this switch
    lock: Mutex<()>,
}

impl SwitchHandle {
    pub fn new(name: impl Into<String>, driver: SwitchDriverRef) -> Self {
        Self {
            name: name.into(),
            driver,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &SwitchDriverRef {
        &self.driver
    }

    /// Take exclusive use of the switch
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl std::fmt::Debug for SwitchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchHandle")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_type())
            .finish()
    }
}

/// Switch groups plus the set of trunk ports
#[derive(Debug, Default)]
pub struct SwitchTopology {
    switches: BTreeMap<String, Arc<SwitchHandle>>,
    trunk_ports: BTreeSet<PortId>,
}

impl SwitchTopology {
    pub fn new(trunk_ports: impl IntoIterator<Item = PortId>) -> Self {
        Self {
            switches: BTreeMap::new(),
            trunk_ports: trunk_ports.into_iter().collect(),
        }
    }

    /// Add a switch group served by `driver`
    pub fn with_switch(mut self, name: impl Into<String>, driver: SwitchDriverRef) -> Self {
        let handle = SwitchHandle::new(name, driver);
        self.switches
            .insert(handle.name.clone(), Arc::new(handle));
        self
    }

    /// Build the topology described by the configuration
    pub fn from_config(config: &HaasConfig, registry: &DriverRegistry) -> Result<Self> {
        let mut topology = Self::new(config.trunk_ports.iter().cloned());

        for spec in &config.switches {
            let driver = registry.create(spec)?;
            info!("Switch group {} uses driver {}", spec.name, spec.switch);
            topology = topology.with_switch(spec.name.clone(), driver);
        }

        Ok(topology)
    }

    /// Handle for a switch group, `Configuration` when unknown
    pub fn switch(&self, group: &str) -> Result<&Arc<SwitchHandle>> {
        self.switches.get(group).ok_or_else(|| {
            Error::Configuration(format!("port names unknown switch group {}", group))
        })
    }

    pub fn kind(&self, port: &PortId) -> PortKind {
        if self.trunk_ports.contains(port) {
            PortKind::Trunk
        } else {
            PortKind::Access
        }
    }

    /// Resolve a port to its switch and kind
    pub fn resolve(&self, port: &PortId) -> Result<(&Arc<SwitchHandle>, PortKind)> {
        Ok((self.switch(port.group())?, self.kind(port)))
    }

    pub fn switches(&self) -> impl Iterator<Item = &Arc<SwitchHandle>> {
        self.switches.values()
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchSpec;
    use assert_matches::assert_matches;

    #[test]
    fn test_from_config() {
        let config = HaasConfig {
            switches: vec![
                SwitchSpec {
                    name: "0".into(),
                    switch: "test".into(),
                },
                SwitchSpec {
                    name: "1".into(),
                    switch: "test".into(),
                },
            ],
            trunk_ports: vec![PortId::new("1", "uplink")],
            ..Default::default()
        };
        let topology = SwitchTopology::from_config(&config, &DriverRegistry::default()).unwrap();
        assert_eq!(topology.len(), 2);

        let (switch, kind) = topology.resolve(&PortId::new("1", "uplink")).unwrap();
        assert_eq!(switch.name(), "1");
        assert_eq!(kind, PortKind::Trunk);
        assert_eq!(topology.kind(&PortId::new("1", "3")), PortKind::Access);

        assert_matches!(
            topology.resolve(&PortId::new("7", "1")),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_unknown_driver_type() {
        let config = HaasConfig {
            switches: vec![SwitchSpec {
                name: "0".into(),
                switch: "nexus".into(),
            }],
            ..Default::default()
        };
        assert_matches!(
            SwitchTopology::from_config(&config, &DriverRegistry::default()),
            Err(Error::Configuration(_))
        );
    }
}
