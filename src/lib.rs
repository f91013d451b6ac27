//! HaaS Control Plane - Network Lifecycle Management
//!
//! Control plane for a Hardware-as-a-Service installation: projects own
//! networks, networks are backed by VLANs leased from a pool, and node NICs
//! are wired to those networks by reconciling port membership onto switches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        REST API (axum) / HaasClient                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                           Network Manager                                    │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Auth Policy   │  │    VLAN Pool    │  │      Record Store           │  │
//! │  │ (admin/project) │  │  (leases)       │  │  (projects/networks/nics)   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │      Reconciler       │                                │
//! │                    │  (per-switch batches) │                                │
//! │                    └───────────┬───────────┘                                │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                          Switch Drivers                                      │
//! │        ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                  │
//! │        │  switch 0   │   │  switch 1   │   │  switch N   │                  │
//! │        └─────────────┘   └─────────────┘   └─────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Network manager, events and REST API
//! - [`switch`]: Driver registry, topology and reconciliation
//! - [`network`]: VLAN pool and record store
//! - [`auth`]: Authentication backends and authorization policy
//! - [`client`]: HTTP client for the REST API
//! - [`config`]: YAML configuration
//! - [`domain`]: Core records and port traits
//! - [`error`]: Error types and handling

pub mod auth;
pub mod client;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod network;
pub mod switch;

// Re-export commonly used types
pub use auth::{authorize, AuthBackendFactory, NullAuthBackend, Operation, TokenAuthBackend};

pub use client::HaasClient;

pub use config::{AuthConfig, ClientConfig, HaasConfig, SwitchSpec};

pub use controlplane::{
    ApiServer, ApiServerConfig, ManagerStatus, NetworkEvent, NetworkInfo, NetworkManager,
    NetworkSpec, RestRouter,
};

pub use domain::ports::{
    Actor, Channel, Connection, Network, Nic, Node, PortChange, PortId, PortKind, Project,
    VlanId, AuthBackend, NetworkStore, SwitchDriver,
};

pub use error::{Error, ErrorKind, Result, SwitchFailure};

pub use metrics::ControlPlaneMetrics;

pub use network::{MemoryStore, PoolStatsSnapshot, VlanLease, VlanPool};

pub use switch::{DriverRegistry, ReconcileReport, Reconciler, SwitchTopology, TestSwitch};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
