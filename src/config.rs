//! Control Plane Configuration
//!
//! YAML configuration read once at startup. Everything the manager, the
//! reconciler and the client need is resolved from here; nothing reads
//! configuration lazily afterwards.
//!
//! ```yaml
//! vlans: "84, 85, 100-110"
//! switches:
//!   - name: "0"
//!     switch: test
//! trunk_ports: ["0::uplink"]
//! switch_call_timeout_secs: 30
//! auth:
//!   backend: token
//!   tokens:
//!     s3cr3t: admin
//!     runway-token: runway
//! client:
//!   endpoint: http://127.0.0.1:8090
//! ```

use crate::domain::ports::PortId;
use crate::error::{Error, Result};
use crate::network::pool::{parse_vlan_list, VlanPool};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Sections
// =============================================================================

/// A switch group and the driver type backing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSpec {
    /// Group name, the part of a port id before `::`
    pub name: String,
    /// Registered driver type
    pub switch: String,
}

/// Request authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Backend name (`null` or `token`)
    pub backend: String,
    /// Bearer token to principal; the principal `admin` grants admin rights,
    /// anything else names a project
    pub tokens: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: "null".to_string(),
            tokens: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: Option<String>,
}

// =============================================================================
// Root Configuration
// =============================================================================

/// Complete control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaasConfig {
    /// VLAN tags available for allocation, e.g. `"84, 85, 100-110"`
    pub vlans: String,
    /// Switch groups
    pub switches: Vec<SwitchSpec>,
    /// Ports carrying several VLANs
    pub trunk_ports: Vec<PortId>,
    /// Upper bound on a single switch call
    pub switch_call_timeout_secs: u64,
    pub auth: AuthConfig,
    pub client: ClientConfig,
}

impl Default for HaasConfig {
    fn default() -> Self {
        Self {
            vlans: String::new(),
            switches: Vec::new(),
            trunk_ports: Vec::new(),
            switch_call_timeout_secs: 30,
            auth: AuthConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl HaasConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        Ok(config)
    }

    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        parse_vlan_list(&self.vlans)?;

        let mut names = BTreeSet::new();
        for spec in &self.switches {
            if spec.name.is_empty() || spec.name.contains(crate::domain::PORT_SEPARATOR) {
                return Err(Error::Configuration(format!(
                    "invalid switch name {:?}",
                    spec.name
                )));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "switch {} declared twice",
                    spec.name
                )));
            }
        }

        for port in &self.trunk_ports {
            if !names.contains(port.group()) {
                return Err(Error::Configuration(format!(
                    "trunk port {} names unknown switch {}",
                    port,
                    port.group()
                )));
            }
        }

        if self.switch_call_timeout_secs == 0 {
            return Err(Error::Configuration(
                "switch_call_timeout_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.switch_call_timeout_secs)
    }

    /// Build the VLAN pool described by `vlans`
    pub fn vlan_pool(&self) -> Result<Arc<VlanPool>> {
        VlanPool::from_spec(&self.vlans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    const SAMPLE: &str = r#"
vlans: "84, 85"
switches:
  - name: "0"
    switch: test
  - name: "1"
    switch: test
trunk_ports: ["1::uplink"]
auth:
  backend: token
  tokens:
    root-token: admin
"#;

    #[test]
    fn test_parse_sample() {
        let config = HaasConfig::from_yaml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.switches.len(), 2);
        assert_eq!(config.trunk_ports[0].to_string(), "1::uplink");
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.auth.backend, "token");
        assert!(config.client.endpoint.is_none());
        assert_eq!(config.vlan_pool().unwrap().capacity(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = HaasConfig::from_yaml("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.auth.backend, "null");
        assert!(config.switches.is_empty());
    }

    #[test]
    fn test_validate_rejects_inconsistencies() {
        let mut config = HaasConfig::from_yaml(SAMPLE).unwrap();
        config.trunk_ports.push(PortId::new("9", "1"));
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = HaasConfig::from_yaml(SAMPLE).unwrap();
        config.switches.push(config.switches[0].clone());
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = HaasConfig::from_yaml(SAMPLE).unwrap();
        config.vlans = "84-80".into();
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_malformed_trunk_port_fails_to_parse() {
        let result = HaasConfig::from_yaml("trunk_ports: [\"uplink\"]");
        assert_matches!(result, Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = HaasConfig::load(file.path()).unwrap();
        assert_eq!(config.vlans, "84, 85");

        assert_matches!(
            HaasConfig::load(file.path().with_extension("missing")),
            Err(Error::Io(_))
        );
    }
}
