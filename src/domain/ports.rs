//! Domain Ports - Core types and trait definitions for the control plane
//!
//! These traits define the boundaries between the domain logic and external
//! systems: physical switches, the transactional store and request
//! authentication. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// VLAN Identifier
// =============================================================================

/// 802.1Q VLAN tag (1-4094)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    pub fn new(id: u16) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(Self(id))
        } else {
            Err(Error::BadArgument(format!(
                "VLAN id {} is outside {}-{}",
                id,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for VlanId {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Self::new(value)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> Self {
        vlan.0
    }
}

impl FromStr for VlanId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: u16 = s
            .trim()
            .parse()
            .map_err(|_| Error::BadArgument(format!("not a VLAN id: {:?}", s)))?;
        Self::new(id)
    }
}

impl std::fmt::Display for VlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Port Identifier
// =============================================================================

/// Separator between switch group and switch-local port name
pub const PORT_SEPARATOR: &str = "::";

/// Logical switch port, written `<switch-group>::<port>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortId {
    group: String,
    port: String,
}

impl PortId {
    pub fn new(group: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            port: port.into(),
        }
    }

    /// Switch group the port belongs to
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Port name local to its switch
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl FromStr for PortId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(PORT_SEPARATOR) {
            Some((group, port)) if !group.is_empty() && !port.is_empty() => {
                Ok(Self::new(group, port))
            }
            _ => Err(Error::BadArgument(format!(
                "port {:?} is not of the form <switch>{}<port>",
                s, PORT_SEPARATOR
            ))),
        }
    }
}

impl TryFrom<String> for PortId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PortId> for String {
    fn from(port: PortId) -> Self {
        port.to_string()
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.group, PORT_SEPARATOR, self.port)
    }
}

/// Whether a port carries one VLAN (access) or several (trunk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Access,
    Trunk,
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Access => write!(f, "access"),
            PortKind::Trunk => write!(f, "trunk"),
        }
    }
}

/// A single membership change pushed to a switch port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op", content = "vlan")]
pub enum PortChange {
    /// Make the VLAN the port's only membership (access ports)
    Assign(VlanId),
    /// Remove the port from every VLAN
    Clear,
    /// Add one VLAN to the port's membership (trunk ports)
    Add(VlanId),
    /// Remove one VLAN from the port's membership (trunk ports)
    Remove(VlanId),
}

impl PortChange {
    /// Whether this change may be applied to a port of the given kind
    pub fn valid_for(&self, kind: PortKind) -> bool {
        match self {
            PortChange::Clear => true,
            PortChange::Assign(_) => kind == PortKind::Access,
            PortChange::Add(_) | PortChange::Remove(_) => kind == PortKind::Trunk,
        }
    }
}

impl std::fmt::Display for PortChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortChange::Assign(vlan) => write!(f, "assign {}", vlan),
            PortChange::Clear => write!(f, "clear"),
            PortChange::Add(vlan) => write!(f, "add {}", vlan),
            PortChange::Remove(vlan) => write!(f, "remove {}", vlan),
        }
    }
}

// =============================================================================
// Actors
// =============================================================================

/// Identity a request is evaluated as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// Platform administrator
    Admin,
    /// A tenant project, by label
    Project(String),
}

impl Actor {
    pub fn project(label: impl Into<String>) -> Self {
        Actor::Project(label.into())
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin)
    }

    /// Project label, `None` for admin
    pub fn project_label(&self) -> Option<&str> {
        match self {
            Actor::Admin => None,
            Actor::Project(label) => Some(label),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Admin => write!(f, "admin"),
            Actor::Project(label) => write!(f, "project {}", label),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            created_at: Utc::now(),
        }
    }
}

/// A logical L2 broadcast domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Unique label
    pub label: String,
    /// Owning project, `None` when admin owned
    pub creator: Option<String>,
    /// Project allowed to use it, `None` when public
    pub access: Option<String>,
    /// Whether `network_id` was leased from the VLAN pool
    pub allocated: bool,
    /// VLAN tag or external channel identifier
    pub network_id: String,
    pub created_at: DateTime<Utc>,
}

impl Network {
    /// The network's VLAN tag, if its identifier is one
    pub fn vlan(&self) -> Result<VlanId> {
        self.network_id.parse().map_err(|_| {
            Error::BadArgument(format!(
                "network {} has identifier {:?}, which is not a VLAN tag",
                self.label, self.network_id
            ))
        })
    }

    pub fn is_public(&self) -> bool {
        self.access.is_none()
    }
}

/// A bare-metal host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            created_at: Utc::now(),
        }
    }
}

/// A node's network interface and the switch port it is cabled to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nic {
    pub node: String,
    pub label: String,
    pub port: PortId,
}

/// Attachment mode of a NIC to a network
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    /// Untagged
    #[default]
    Native,
    /// 802.1Q tagged with the given VLAN
    Tagged(VlanId),
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix("vlan/") {
            Some("native") => Ok(Channel::Native),
            Some(tag) => tag
                .parse()
                .map(Channel::Tagged)
                .map_err(|_| Error::BadArgument(format!("invalid channel {:?}", s))),
            None => Err(Error::BadArgument(format!("invalid channel {:?}", s))),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Native => write!(f, "vlan/native"),
            Channel::Tagged(vlan) => write!(f, "vlan/{}", vlan),
        }
    }
}

/// Binding of a NIC channel to a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub node: String,
    pub nic: String,
    pub channel: Channel,
    pub network: String,
}

// =============================================================================
// Switch Capability Port
// =============================================================================

/// Port every switch driver implements
///
/// Port names passed to and returned from a driver are local to the switch
/// (the part after `::`).
#[async_trait]
pub trait SwitchDriver: Send + Sync {
    /// Registered driver type name
    fn driver_type(&self) -> &str;

    /// Apply a membership change to a port
    async fn apply(&self, port: &str, change: PortChange) -> Result<()>;

    /// Ports currently members of the VLAN
    async fn get_members(&self, vlan: VlanId) -> Result<BTreeSet<String>>;

    /// Check if the switch is reachable
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Persistence Port
// =============================================================================

/// Transactional store for control plane records
///
/// Each call is atomic. Uniqueness and referential checks happen inside the
/// call that mutates state.
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Insert a project, `Duplicate` if the label is taken
    async fn insert_project(&self, project: Project) -> Result<()>;

    async fn get_project(&self, label: &str) -> Result<Option<Project>>;

    /// Remove a project, `Blocked` while any network names it
    async fn delete_project(&self, label: &str) -> Result<Project>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Insert a network, `Duplicate` on label or allocated identifier collision
    async fn insert_network(&self, network: Network) -> Result<()>;

    async fn get_network(&self, label: &str) -> Result<Option<Network>>;

    /// Remove a network, `Blocked` while any connection references it
    async fn delete_network(&self, label: &str) -> Result<Network>;

    async fn list_networks(&self) -> Result<Vec<Network>>;

    async fn insert_node(&self, node: Node) -> Result<()>;

    async fn get_node(&self, label: &str) -> Result<Option<Node>>;

    /// Insert a NIC, `NotFound` without its node, `Duplicate` if the port is cabled already
    async fn insert_nic(&self, nic: Nic) -> Result<()>;

    async fn get_nic(&self, node: &str, nic: &str) -> Result<Option<Nic>>;

    /// Insert or replace the connection on `(node, nic, channel)`, returning the replaced one
    async fn put_connection(&self, connection: Connection) -> Result<Option<Connection>>;

    /// Remove the connection on `(node, nic, channel)`
    async fn remove_connection(
        &self,
        node: &str,
        nic: &str,
        channel: Channel,
    ) -> Result<Option<Connection>>;

    /// All live connections of a NIC
    async fn connections_for_nic(&self, node: &str, nic: &str) -> Result<Vec<Connection>>;
}

// =============================================================================
// Authentication Port
// =============================================================================

/// Port turning request credentials into an [`Actor`]
pub trait AuthBackend: Send + Sync {
    /// Backend name as used in configuration
    fn name(&self) -> &str;

    /// Resolve the actor for a request carrying an optional bearer token
    fn authenticate(&self, token: Option<&str>) -> Result<Actor>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type SwitchDriverRef = Arc<dyn SwitchDriver>;
pub type NetworkStoreRef = Arc<dyn NetworkStore>;
pub type AuthBackendRef = Arc<dyn AuthBackend>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_vlan_id_validation() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert_matches!(VlanId::new(0), Err(Error::BadArgument(_)));
        assert_matches!(VlanId::new(4095), Err(Error::BadArgument(_)));
        assert_eq!(" 84 ".parse::<VlanId>().unwrap().get(), 84);
        assert!("ext_pub_chan".parse::<VlanId>().is_err());
    }

    #[test]
    fn test_port_id_parse() {
        let port: PortId = "1::2".parse().unwrap();
        assert_eq!(port.group(), "1");
        assert_eq!(port.port(), "2");
        assert_eq!(port.to_string(), "1::2");

        let port: PortId = "sw0::gi1/0/3".parse().unwrap();
        assert_eq!(port.port(), "gi1/0/3");

        assert!("12".parse::<PortId>().is_err());
        assert!("::2".parse::<PortId>().is_err());
        assert!("1::".parse::<PortId>().is_err());
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("vlan/native".parse::<Channel>().unwrap(), Channel::Native);
        assert_eq!(
            "vlan/102".parse::<Channel>().unwrap(),
            Channel::Tagged(VlanId::new(102).unwrap())
        );
        assert!("vlan/".parse::<Channel>().is_err());
        assert!("native".parse::<Channel>().is_err());
        assert_eq!(Channel::default().to_string(), "vlan/native");
    }

    #[test]
    fn test_port_change_validity() {
        let vlan = VlanId::new(84).unwrap();
        assert!(PortChange::Assign(vlan).valid_for(PortKind::Access));
        assert!(!PortChange::Assign(vlan).valid_for(PortKind::Trunk));
        assert!(PortChange::Add(vlan).valid_for(PortKind::Trunk));
        assert!(!PortChange::Remove(vlan).valid_for(PortKind::Access));
        assert!(PortChange::Clear.valid_for(PortKind::Access));
        assert!(PortChange::Clear.valid_for(PortKind::Trunk));
    }

    #[test]
    fn test_network_vlan() {
        let mut network = Network {
            label: "pxe".into(),
            creator: None,
            access: None,
            allocated: true,
            network_id: "84".into(),
            created_at: Utc::now(),
        };
        assert_eq!(network.vlan().unwrap().get(), 84);
        assert!(network.is_public());

        network.network_id = "runway_provider_chan".into();
        assert_matches!(network.vlan(), Err(Error::BadArgument(_)));
    }
}
