//! Network Lifecycle Manager
//!
//! Coordinates all control plane operations:
//! - Network create/delete/show with VLAN leasing
//! - Project, node and NIC registration
//! - Connecting NICs to networks and pushing the result to switches
//!
//! Every operation authorizes before it mutates anything. Connect and
//! detach update the store first, push the NIC's resulting membership to
//! its switch, and restore the previous connection if the switch rejects it.

use super::events::NetworkEvent;
use crate::auth::policy::{authorize, visible_to, Operation};
use crate::config::HaasConfig;
use crate::domain::ports::{
    Actor, Channel, Connection, Network, NetworkStoreRef, Nic, Node, PortChange, PortId,
    PortKind, Project, VlanId,
};
use crate::error::{Error, Result};
use crate::metrics::ControlPlaneMetrics;
use crate::network::{MemoryStore, VlanPool};
use crate::switch::{DriverRegistry, Reconciler, SwitchTopology};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Creator name used on the wire for admin-owned networks
pub const ADMIN_CREATOR: &str = "admin";

// =============================================================================
// Requests and Views
// =============================================================================

/// Ownership and identifier of a network to create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Owning project, `None` for admin
    pub creator: Option<String>,
    /// Project allowed to use the network, `None` for public
    pub access: Option<String>,
    /// Externally supplied identifier, `None` to lease a VLAN
    pub network_id: Option<String>,
}

impl NetworkSpec {
    /// Build from wire values: creator `admin`, empty access and empty
    /// network id stand for "none"
    pub fn from_wire(creator: &str, access: &str, network_id: &str) -> Self {
        let some = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            creator: (creator != ADMIN_CREATOR).then(|| creator.to_string()),
            access: some(access),
            network_id: some(network_id),
        }
    }
}

/// Network attributes as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    /// Owning project, or `admin`
    pub creator: String,
    /// Project with access, `None` when public
    pub access: Option<String>,
    pub allocated: bool,
    pub network_id: String,
    /// Channels a NIC may use to attach
    pub channels: Vec<String>,
}

impl From<&Network> for NetworkInfo {
    fn from(network: &Network) -> Self {
        let mut channels = vec![Channel::Native.to_string()];
        if let Ok(vlan) = network.vlan() {
            channels.push(Channel::Tagged(vlan).to_string());
        }

        Self {
            name: network.label.clone(),
            creator: network
                .creator
                .clone()
                .unwrap_or_else(|| ADMIN_CREATOR.to_string()),
            access: network.access.clone(),
            allocated: network.allocated,
            network_id: network.network_id.clone(),
            channels,
        }
    }
}

/// Manager status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub healthy: bool,
    pub networks: u64,
    pub projects: u64,
    pub vlan_capacity: u64,
    pub vlans_leased: u64,
    pub switches_health: BTreeMap<String, bool>,
}

// =============================================================================
// Network Manager
// =============================================================================

type NicKey = (String, String);

/// Lifecycle manager for networks and their switch wiring
pub struct NetworkManager {
    store: NetworkStoreRef,
    pool: Arc<VlanPool>,
    reconciler: Reconciler,
    metrics: Arc<ControlPlaneMetrics>,
    event_tx: broadcast::Sender<NetworkEvent>,
    /// Serializes wiring changes per NIC
    nic_locks: Mutex<BTreeMap<NicKey, Arc<AsyncMutex<()>>>>,
}

impl NetworkManager {
    pub fn new(
        store: NetworkStoreRef,
        pool: Arc<VlanPool>,
        reconciler: Reconciler,
        metrics: Arc<ControlPlaneMetrics>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);

        Arc::new(Self {
            store,
            pool,
            reconciler,
            metrics,
            event_tx,
            nic_locks: Mutex::new(BTreeMap::new()),
        })
    }

    /// Build a manager over an in-memory store from configuration
    pub fn from_config(config: &HaasConfig, registry: &DriverRegistry) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(ControlPlaneMetrics::new()?);
        let topology = Arc::new(SwitchTopology::from_config(config, registry)?);
        let reconciler =
            Reconciler::new(topology, config.call_timeout()).with_metrics(metrics.clone());
        let pool = config.vlan_pool()?;

        info!(
            "Network manager configured: {} VLAN(s), {} switch group(s)",
            pool.capacity(),
            config.switches.len()
        );

        Ok(Self::new(
            Arc::new(MemoryStore::new()),
            pool,
            reconciler,
            metrics,
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.event_tx.subscribe()
    }

    pub fn metrics(&self) -> &Arc<ControlPlaneMetrics> {
        &self.metrics
    }

    pub fn pool(&self) -> &Arc<VlanPool> {
        &self.pool
    }

    fn emit(&self, event: NetworkEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Re-mark the VLANs of stored allocated networks as leased
    ///
    /// Run once at startup, before serving requests.
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;

        for network in self.store.list_networks().await? {
            if !network.allocated {
                continue;
            }
            match network.vlan() {
                Ok(vlan) if self.pool.mark_leased(vlan) => recovered += 1,
                Ok(vlan) => warn!(
                    "Network {} holds VLAN {} which is not free in the pool",
                    network.label, vlan
                ),
                Err(e) => warn!("Skipping network {}: {}", network.label, e),
            }
        }

        info!("Recovered {} VLAN lease(s)", recovered);
        self.refresh_gauges().await;
        Ok(recovered)
    }

    async fn refresh_gauges(&self) {
        self.metrics.set_leased_vlans(self.pool.leased().len());
        match self.store.list_networks().await {
            Ok(networks) => self.metrics.set_networks(networks.len()),
            Err(e) => debug!("Could not count networks: {}", e),
        }
    }

    // =========================================================================
    // Projects and Nodes
    // =========================================================================

    pub async fn project_create(&self, actor: &Actor, label: &str) -> Result<()> {
        authorize(actor, &Operation::Administer("project_create"))?;
        self.store.insert_project(Project::new(label)).await?;

        info!("Created project {}", label);
        self.emit(NetworkEvent::ProjectCreated {
            project: label.to_string(),
        });
        Ok(())
    }

    pub async fn project_delete(&self, actor: &Actor, label: &str) -> Result<()> {
        authorize(actor, &Operation::Administer("project_delete"))?;
        self.store.delete_project(label).await?;

        info!("Deleted project {}", label);
        self.emit(NetworkEvent::ProjectDeleted {
            project: label.to_string(),
        });
        Ok(())
    }

    pub async fn node_register(&self, actor: &Actor, label: &str) -> Result<()> {
        authorize(actor, &Operation::Administer("node_register"))?;
        self.store.insert_node(Node::new(label)).await?;

        info!("Registered node {}", label);
        self.emit(NetworkEvent::NodeRegistered {
            node: label.to_string(),
        });
        Ok(())
    }

    /// Register a NIC of `node` cabled to `port` (`<switch>::<port>`)
    pub async fn node_register_nic(
        &self,
        actor: &Actor,
        node: &str,
        nic: &str,
        port: &str,
    ) -> Result<()> {
        authorize(actor, &Operation::Administer("node_register_nic"))?;
        let port: PortId = port.parse()?;
        self.reconciler.topology().switch(port.group())?;

        self.store
            .insert_nic(Nic {
                node: node.to_string(),
                label: nic.to_string(),
                port: port.clone(),
            })
            .await?;

        info!("Registered NIC {}/{} on port {}", node, nic, port);
        self.emit(NetworkEvent::NicRegistered {
            node: node.to_string(),
            nic: nic.to_string(),
            port: port.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Networks
    // =========================================================================

    /// Create a network, leasing a VLAN unless an identifier is supplied
    pub async fn network_create(
        &self,
        actor: &Actor,
        label: &str,
        spec: NetworkSpec,
    ) -> Result<NetworkInfo> {
        // Project existence is checked by the store, after authorization
        authorize(
            actor,
            &Operation::NetworkCreate {
                creator: spec.creator.as_deref(),
                access: spec.access.as_deref(),
                explicit_id: spec.network_id.is_some(),
            },
        )?;

        let (network_id, lease) = match spec.network_id {
            Some(id) => {
                if let Ok(vlan) = id.parse::<VlanId>() {
                    if self.pool.contains(vlan) {
                        return Err(Error::BadArgument(format!(
                            "network_id {} is managed by the VLAN pool",
                            vlan
                        )));
                    }
                }
                (id, None)
            }
            None => {
                let lease = self.pool.lease()?;
                (lease.vlan().to_string(), Some(lease))
            }
        };

        let network = Network {
            label: label.to_string(),
            creator: spec.creator,
            access: spec.access,
            allocated: lease.is_some(),
            network_id,
            created_at: chrono::Utc::now(),
        };

        // An uncommitted lease goes back to the pool if the insert fails
        self.store.insert_network(network.clone()).await?;
        if let Some(lease) = lease {
            lease.commit();
        }

        info!(
            "Created network {} ({}{})",
            network.label,
            network.network_id,
            if network.allocated { ", allocated" } else { "" }
        );
        self.emit(NetworkEvent::NetworkCreated {
            network: network.label.clone(),
            network_id: network.network_id.clone(),
            allocated: network.allocated,
        });
        self.refresh_gauges().await;

        Ok(NetworkInfo::from(&network))
    }

    /// Delete a network, returning its VLAN to the pool when allocated
    pub async fn network_delete(&self, actor: &Actor, label: &str) -> Result<()> {
        let network = self.require_network(label).await?;
        authorize(actor, &Operation::NetworkDelete(&network))?;

        let network = self.store.delete_network(label).await?;
        let released = network.allocated
            && match network.vlan() {
                Ok(vlan) => self.pool.release(vlan),
                Err(_) => false,
            };

        info!("Deleted network {} (released: {})", label, released);
        self.emit(NetworkEvent::NetworkDeleted {
            network: label.to_string(),
            released,
        });
        self.refresh_gauges().await;
        Ok(())
    }

    pub async fn show_network(&self, actor: &Actor, label: &str) -> Result<NetworkInfo> {
        let network = self.require_network(label).await?;
        authorize(actor, &Operation::NetworkShow(&network))?;
        Ok(NetworkInfo::from(&network))
    }

    /// Networks the actor can see
    pub async fn list_networks(&self, actor: &Actor) -> Result<Vec<NetworkInfo>> {
        let networks = self.store.list_networks().await?;
        Ok(networks
            .iter()
            .filter(|network| match actor.project_label() {
                None => true,
                Some(project) => visible_to(network, project),
            })
            .map(NetworkInfo::from)
            .collect())
    }

    /// VLAN tags currently leased
    pub async fn leased_vlans(&self, actor: &Actor) -> Result<Vec<VlanId>> {
        authorize(actor, &Operation::Administer("leased_vlans"))?;
        Ok(self.pool.leased())
    }

    /// Switch ports currently carrying each VLAN
    pub async fn get_switch_vlans(
        &self,
        actor: &Actor,
        vlans: &[VlanId],
    ) -> Result<BTreeMap<VlanId, Vec<String>>> {
        authorize(actor, &Operation::Administer("get_switch_vlans"))?;
        self.reconciler.get_switch_vlans(vlans).await
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Attach a NIC channel to a network and update the switch
    pub async fn node_connect_network(
        &self,
        actor: &Actor,
        node: &str,
        nic: &str,
        network: &str,
        channel: Channel,
    ) -> Result<()> {
        let nic_record = self.require_nic(node, nic).await?;
        let network_record = self.require_network(network).await?;
        authorize(actor, &Operation::NetworkConnect(&network_record))?;

        let vlan = network_record.vlan()?;
        let (_, kind) = self.reconciler.topology().resolve(&nic_record.port)?;
        match channel {
            Channel::Tagged(_) if kind == PortKind::Access => {
                return Err(Error::BadArgument(format!(
                    "access port {} only carries {}",
                    nic_record.port,
                    Channel::Native
                )));
            }
            Channel::Tagged(tag) if tag != vlan => {
                return Err(Error::BadArgument(format!(
                    "channel {} is not legal for network {}",
                    channel, network
                )));
            }
            _ => {}
        }

        let _guard = self.lock_nic(node, nic).await;
        let before = self.nic_membership(node, nic).await?;

        let replaced = self
            .store
            .put_connection(Connection {
                node: node.to_string(),
                nic: nic.to_string(),
                channel,
                network: network.to_string(),
            })
            .await?;

        self.reconcile_nic(&nic_record, &before, channel, replaced).await?;

        info!("Connected {}/{} {} to {}", node, nic, channel, network);
        self.emit(NetworkEvent::NodeConnected {
            node: node.to_string(),
            nic: nic.to_string(),
            network: network.to_string(),
            channel: channel.to_string(),
        });
        Ok(())
    }

    /// Detach a NIC from a network and update the switch
    pub async fn node_detach_network(
        &self,
        actor: &Actor,
        node: &str,
        nic: &str,
        network: &str,
    ) -> Result<()> {
        let nic_record = self.require_nic(node, nic).await?;
        let network_record = self.require_network(network).await?;
        authorize(actor, &Operation::NetworkConnect(&network_record))?;

        let _guard = self.lock_nic(node, nic).await;
        let connection = self
            .store
            .connections_for_nic(node, nic)
            .await?
            .into_iter()
            .find(|c| c.network == network)
            .ok_or_else(|| {
                Error::not_found("connection", format!("{}/{} to {}", node, nic, network))
            })?;

        let before = self.nic_membership(node, nic).await?;
        self.store
            .remove_connection(node, nic, connection.channel)
            .await?;

        let channel = connection.channel;
        self.reconcile_nic(&nic_record, &before, channel, Some(connection)).await?;

        info!("Detached {}/{} from {}", node, nic, network);
        self.emit(NetworkEvent::NodeDetached {
            node: node.to_string(),
            nic: nic.to_string(),
            network: network.to_string(),
            channel: channel.to_string(),
        });
        Ok(())
    }

    /// Push the NIC's stored membership to its switch, undoing the store
    /// change to `channel` if that fails
    async fn reconcile_nic(
        &self,
        nic: &Nic,
        before: &BTreeSet<VlanId>,
        channel: Channel,
        previous: Option<Connection>,
    ) -> Result<()> {
        let after = match self.nic_membership(&nic.node, &nic.label).await {
            Ok(after) => after,
            Err(e) => {
                self.restore_connection(nic, channel, previous).await;
                return Err(e);
            }
        };

        if let Err(e) = self.push_membership(nic, before, &after).await {
            self.restore_connection(nic, channel, previous).await;
            self.report_failure(nic, &after, before, &e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn push_membership(
        &self,
        nic: &Nic,
        before: &BTreeSet<VlanId>,
        after: &BTreeSet<VlanId>,
    ) -> Result<()> {
        let kind = self.reconciler.topology().kind(&nic.port);
        let changes = port_changes(kind, before, after)
            .into_iter()
            .map(|change| (nic.port.clone(), change))
            .collect::<Vec<_>>();

        debug!("Port {} moves from {:?} to {:?}", nic.port, before, after);
        self.reconciler.apply_changes(changes).await.map(|_| ())
    }

    /// Put back the connection a failed change displaced
    async fn restore_connection(&self, nic: &Nic, channel: Channel, previous: Option<Connection>) {
        let result = match previous {
            Some(connection) => self.store.put_connection(connection).await.map(|_| ()),
            None => self
                .store
                .remove_connection(&nic.node, &nic.label, channel)
                .await
                .map(|_| ()),
        };

        if let Err(e) = result {
            error!(
                "Failed to restore connection of {}/{} {}: {}",
                nic.node, nic.label, channel, e
            );
        }
    }

    /// Best-effort move of the port from `attempted` back to `before`, then
    /// notify observers
    async fn report_failure(
        &self,
        nic: &Nic,
        attempted: &BTreeSet<VlanId>,
        before: &BTreeSet<VlanId>,
        cause: &Error,
    ) {
        warn!("Rolled back wiring of {}/{}: {}", nic.node, nic.label, cause);

        let kind = self.reconciler.topology().kind(&nic.port);
        let restore = port_changes(kind, attempted, before)
            .into_iter()
            .map(|change| (nic.port.clone(), change))
            .collect();
        if let Err(e) = self.reconciler.apply_changes(restore).await {
            warn!("Switch state of {} not restored: {}", nic.port, e);
        }

        if let Error::SwitchApply { failures, .. } = cause {
            self.emit(NetworkEvent::ReconcileFailed {
                node: nic.node.clone(),
                nic: nic.label.clone(),
                failures: failures.clone(),
            });
        }
    }

    /// VLANs the NIC's stored connections put its port in
    async fn nic_membership(&self, node: &str, nic: &str) -> Result<BTreeSet<VlanId>> {
        let mut vlans = BTreeSet::new();
        for connection in self.store.connections_for_nic(node, nic).await? {
            let network = self.require_network(&connection.network).await?;
            vlans.insert(network.vlan()?);
        }
        Ok(vlans)
    }

    async fn lock_nic(&self, node: &str, nic: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .nic_locks
            .lock()
            .entry((node.to_string(), nic.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    async fn require_network(&self, label: &str) -> Result<Network> {
        self.store
            .get_network(label)
            .await?
            .ok_or_else(|| Error::not_found("network", label))
    }

    async fn require_nic(&self, node: &str, nic: &str) -> Result<Nic> {
        if self.store.get_node(node).await?.is_none() {
            return Err(Error::not_found("node", node));
        }
        self.store
            .get_nic(node, nic)
            .await?
            .ok_or_else(|| Error::not_found("nic", format!("{}/{}", node, nic)))
    }

    /// Get overall manager status
    pub async fn status(&self) -> ManagerStatus {
        let switches_health = self.reconciler.health().await;
        let networks = self.store.list_networks().await.map(|n| n.len()).unwrap_or(0);
        let projects = self.store.list_projects().await.map(|p| p.len()).unwrap_or(0);
        let stats = self.pool.stats();

        ManagerStatus {
            healthy: switches_health.values().all(|&h| h),
            networks: networks as u64,
            projects: projects as u64,
            vlan_capacity: stats.capacity as u64,
            vlans_leased: stats.leased as u64,
            switches_health,
        }
    }
}

/// Changes taking a port from `before` to `after` membership
///
/// Access ports are always driven to their full desired state, which the
/// reconciler skips when the switch already matches.
fn port_changes(
    kind: PortKind,
    before: &BTreeSet<VlanId>,
    after: &BTreeSet<VlanId>,
) -> Vec<PortChange> {
    match kind {
        PortKind::Access => match after.iter().next() {
            Some(vlan) => vec![PortChange::Assign(*vlan)],
            None => vec![PortChange::Clear],
        },
        PortKind::Trunk => before
            .difference(after)
            .map(|vlan| PortChange::Remove(*vlan))
            .chain(after.iter().map(|vlan| PortChange::Add(*vlan)))
            .collect(),
    }
}
