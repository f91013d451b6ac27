//! Switch Layer
//!
//! Provides:
//! - Driver registry keyed by switch type name
//! - Switch topology (groups, trunk ports, per-switch serialization)
//! - Reconciliation of desired port membership onto switches
//! - The in-memory `test` switch driver

pub mod reconcile;
pub mod test_switch;
pub mod topology;

pub use reconcile::*;
pub use test_switch::*;
pub use topology::*;

use crate::config::SwitchSpec;
use crate::domain::ports::SwitchDriverRef;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Constructor for a switch driver
pub type DriverConstructor = Arc<dyn Fn(&SwitchSpec) -> Result<SwitchDriverRef> + Send + Sync>;

/// Registry mapping switch type names to driver constructors
#[derive(Clone)]
pub struct DriverRegistry {
    constructors: BTreeMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// Registry with no driver types
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register a driver type, replacing any previous constructor of that name
    pub fn register<F>(&mut self, switch_type: impl Into<String>, constructor: F)
    where
        F: Fn(&SwitchSpec) -> Result<SwitchDriverRef> + Send + Sync + 'static,
    {
        self.constructors
            .insert(switch_type.into().to_lowercase(), Arc::new(constructor));
    }

    /// Create the driver for a switch group
    pub fn create(&self, spec: &SwitchSpec) -> Result<SwitchDriverRef> {
        let constructor = self
            .constructors
            .get(&spec.switch.to_lowercase())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "switch {} has unknown driver type {}",
                    spec.name, spec.switch
                ))
            })?;
        constructor(spec)
    }

    /// Registered type names
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(TEST_SWITCH_TYPE, |_| Ok(Arc::new(TestSwitch::new())));
        registry
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry = DriverRegistry::default();
        assert_eq!(registry.types(), vec!["test"]);

        let spec = SwitchSpec {
            name: "0".into(),
            switch: "TEST".into(),
        };
        assert_eq!(registry.create(&spec).unwrap().driver_type(), "test");

        assert!(DriverRegistry::empty().create(&spec).is_err());
    }
}
