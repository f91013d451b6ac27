//! Authorization Policy
//!
//! Decides whether an actor may perform a lifecycle operation. The policy is
//! a pure function of the actor and the operation's subject; it never reads
//! the store and never mutates anything, so callers can evaluate it before
//! any side effect.

use crate::domain::ports::{Actor, Network};
use crate::error::{Error, Result};

// =============================================================================
// Operations
// =============================================================================

/// An operation subject to authorization
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// Create a network with the given ownership
    NetworkCreate {
        creator: Option<&'a str>,
        access: Option<&'a str>,
        /// Caller supplied a network identifier instead of leasing one
        explicit_id: bool,
    },
    NetworkDelete(&'a Network),
    NetworkShow(&'a Network),
    /// Connect to or detach from a network
    NetworkConnect(&'a Network),
    /// Platform administration (projects, nodes, pool diagnostics)
    Administer(&'a str),
}

impl std::fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::NetworkCreate { .. } => write!(f, "network_create"),
            Operation::NetworkDelete(n) => write!(f, "network_delete({})", n.label),
            Operation::NetworkShow(n) => write!(f, "show_network({})", n.label),
            Operation::NetworkConnect(n) => write!(f, "connect({})", n.label),
            Operation::Administer(what) => write!(f, "{}", what),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Evaluate `operation` for `actor`
///
/// Admins are allowed everything. For projects, supplying an explicit network
/// identifier is rejected as `BadArgument` before any ownership rule is
/// consulted; every other refusal is `Authorization`.
pub fn authorize(actor: &Actor, operation: &Operation<'_>) -> Result<()> {
    let project = match actor {
        Actor::Admin => return Ok(()),
        Actor::Project(label) => label.as_str(),
    };

    let allowed = match *operation {
        Operation::NetworkCreate {
            creator,
            access,
            explicit_id,
        } => {
            if explicit_id {
                return Err(Error::BadArgument(
                    "projects may not supply a network_id".into(),
                ));
            }
            creator == Some(project) && access == Some(project)
        }
        Operation::NetworkDelete(network) => network.creator.as_deref() == Some(project),
        Operation::NetworkShow(network) | Operation::NetworkConnect(network) => {
            visible_to(network, project)
        }
        Operation::Administer(_) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::Authorization(format!(
            "{} may not perform {}",
            actor, operation
        )))
    }
}

/// Whether a project can see a network
pub fn visible_to(network: &Network, project: &str) -> bool {
    match network.access.as_deref() {
        None => true,
        Some(access) => access == project,
    }
}
