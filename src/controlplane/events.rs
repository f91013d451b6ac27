//! Network Events
//!
//! Events emitted by the network manager after each successful mutation,
//! and when a switch batch fails.

use crate::error::SwitchFailure;
use serde::{Deserialize, Serialize};

/// Events emitted by the network manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    ProjectCreated { project: String },

    ProjectDeleted { project: String },

    /// A network record was stored
    NetworkCreated {
        network: String,
        network_id: String,
        allocated: bool,
    },

    /// A network record was removed; `released` when its VLAN went back to the pool
    NetworkDeleted { network: String, released: bool },

    NodeRegistered { node: String },

    NicRegistered {
        node: String,
        nic: String,
        port: String,
    },

    /// A NIC channel was attached to a network and the switch updated
    NodeConnected {
        node: String,
        nic: String,
        network: String,
        channel: String,
    },

    /// A NIC channel was detached from a network and the switch updated
    NodeDetached {
        node: String,
        nic: String,
        network: String,
        channel: String,
    },

    /// A switch batch failed and the connection change was rolled back
    ReconcileFailed {
        node: String,
        nic: String,
        failures: Vec<SwitchFailure>,
    },
}

impl NetworkEvent {
    /// Network label associated with this event
    pub fn network(&self) -> Option<&str> {
        match self {
            NetworkEvent::NetworkCreated { network, .. }
            | NetworkEvent::NetworkDeleted { network, .. }
            | NetworkEvent::NodeConnected { network, .. }
            | NetworkEvent::NodeDetached { network, .. } => Some(network),
            _ => None,
        }
    }

    /// Node label associated with this event
    pub fn node(&self) -> Option<&str> {
        match self {
            NetworkEvent::NodeRegistered { node }
            | NetworkEvent::NicRegistered { node, .. }
            | NetworkEvent::NodeConnected { node, .. }
            | NetworkEvent::NodeDetached { node, .. }
            | NetworkEvent::ReconcileFailed { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Check if this event reports a switch change
    pub fn touches_switch(&self) -> bool {
        matches!(
            self,
            NetworkEvent::NodeConnected { .. }
                | NetworkEvent::NodeDetached { .. }
                | NetworkEvent::ReconcileFailed { .. }
        )
    }
}
