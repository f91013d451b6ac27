//! Network Control Plane Module
//!
//! The lifecycle manager coordinating VLAN allocation, authorization and
//! switch reconciliation, plus the REST API in front of it.

pub mod api;
pub mod events;
pub mod manager;

pub use api::*;
pub use events::*;
pub use manager::*;
