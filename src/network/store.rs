//! In-Memory Record Store
//!
//! Implements [`NetworkStore`] over a single lock-protected state. Every
//! trait call takes the lock once, so uniqueness and reference checks are
//! atomic with the mutation they guard.

use crate::domain::ports::{Channel, Connection, Network, NetworkStore, Nic, Node, Project};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type NicKey = (String, String);
type ConnectionKey = (String, String, Channel);

#[derive(Debug, Default)]
struct StoreState {
    projects: BTreeMap<String, Project>,
    networks: BTreeMap<String, Network>,
    nodes: BTreeMap<String, Node>,
    nics: BTreeMap<NicKey, Nic>,
    connections: BTreeMap<ConnectionKey, Connection>,
}

impl StoreState {
    fn require_project(&self, label: &Option<String>) -> Result<()> {
        match label {
            Some(label) if !self.projects.contains_key(label) => {
                Err(Error::not_found("project", label.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Store keeping all records in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections referencing a network
    pub fn connection_count(&self, network: &str) -> usize {
        self.state
            .read()
            .connections
            .values()
            .filter(|c| c.network == network)
            .count()
    }
}

#[async_trait]
impl NetworkStore for MemoryStore {
    async fn insert_project(&self, project: Project) -> Result<()> {
        let mut state = self.state.write();
        if state.projects.contains_key(&project.label) {
            return Err(Error::duplicate("project", project.label));
        }
        state.projects.insert(project.label.clone(), project);
        Ok(())
    }

    async fn get_project(&self, label: &str) -> Result<Option<Project>> {
        Ok(self.state.read().projects.get(label).cloned())
    }

    async fn delete_project(&self, label: &str) -> Result<Project> {
        let mut state = self.state.write();
        if !state.projects.contains_key(label) {
            return Err(Error::not_found("project", label));
        }

        let owned = state
            .networks
            .values()
            .filter(|n| {
                n.creator.as_deref() == Some(label) || n.access.as_deref() == Some(label)
            })
            .count();
        if owned > 0 {
            return Err(Error::Blocked {
                kind: "project".into(),
                name: label.to_string(),
                reason: format!("{} network(s) still reference it", owned),
            });
        }

        state
            .projects
            .remove(label)
            .ok_or_else(|| Error::not_found("project", label))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.state.read().projects.values().cloned().collect())
    }

    async fn insert_network(&self, network: Network) -> Result<()> {
        let mut state = self.state.write();
        if state.networks.contains_key(&network.label) {
            return Err(Error::duplicate("network", network.label));
        }
        if network.allocated
            && state
                .networks
                .values()
                .any(|n| n.allocated && n.network_id == network.network_id)
        {
            return Err(Error::duplicate("network_id", network.network_id));
        }
        state.require_project(&network.creator)?;
        state.require_project(&network.access)?;

        state.networks.insert(network.label.clone(), network);
        Ok(())
    }

    async fn get_network(&self, label: &str) -> Result<Option<Network>> {
        Ok(self.state.read().networks.get(label).cloned())
    }

    async fn delete_network(&self, label: &str) -> Result<Network> {
        let mut state = self.state.write();
        if !state.networks.contains_key(label) {
            return Err(Error::not_found("network", label));
        }

        let in_use = state
            .connections
            .values()
            .filter(|c| c.network == label)
            .count();
        if in_use > 0 {
            return Err(Error::Blocked {
                kind: "network".into(),
                name: label.to_string(),
                reason: format!("{} live connection(s)", in_use),
            });
        }

        state
            .networks
            .remove(label)
            .ok_or_else(|| Error::not_found("network", label))
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        Ok(self.state.read().networks.values().cloned().collect())
    }

    async fn insert_node(&self, node: Node) -> Result<()> {
        let mut state = self.state.write();
        if state.nodes.contains_key(&node.label) {
            return Err(Error::duplicate("node", node.label));
        }
        state.nodes.insert(node.label.clone(), node);
        Ok(())
    }

    async fn get_node(&self, label: &str) -> Result<Option<Node>> {
        Ok(self.state.read().nodes.get(label).cloned())
    }

    async fn insert_nic(&self, nic: Nic) -> Result<()> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(&nic.node) {
            return Err(Error::not_found("node", nic.node));
        }

        let key = (nic.node.clone(), nic.label.clone());
        if state.nics.contains_key(&key) {
            return Err(Error::duplicate("nic", format!("{}/{}", nic.node, nic.label)));
        }
        if state.nics.values().any(|n| n.port == nic.port) {
            return Err(Error::duplicate("port", nic.port.to_string()));
        }

        state.nics.insert(key, nic);
        Ok(())
    }

    async fn get_nic(&self, node: &str, nic: &str) -> Result<Option<Nic>> {
        let key = (node.to_string(), nic.to_string());
        Ok(self.state.read().nics.get(&key).cloned())
    }

    async fn put_connection(&self, connection: Connection) -> Result<Option<Connection>> {
        let mut state = self.state.write();

        let nic_key = (connection.node.clone(), connection.nic.clone());
        if !state.nics.contains_key(&nic_key) {
            return Err(Error::not_found(
                "nic",
                format!("{}/{}", connection.node, connection.nic),
            ));
        }
        if !state.networks.contains_key(&connection.network) {
            return Err(Error::not_found("network", connection.network));
        }

        let key = (
            connection.node.clone(),
            connection.nic.clone(),
            connection.channel,
        );
        Ok(state.connections.insert(key, connection))
    }

    async fn remove_connection(
        &self,
        node: &str,
        nic: &str,
        channel: Channel,
    ) -> Result<Option<Connection>> {
        let key = (node.to_string(), nic.to_string(), channel);
        Ok(self.state.write().connections.remove(&key))
    }

    async fn connections_for_nic(&self, node: &str, nic: &str) -> Result<Vec<Connection>> {
        Ok(self
            .state
            .read()
            .connections
            .values()
            .filter(|c| c.node == node && c.nic == nic)
            .cloned()
            .collect())
    }
}
