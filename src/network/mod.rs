//! Network Resources Module
//!
//! VLAN pool allocation and the in-memory record store.

pub mod pool;
pub mod store;

pub use pool::*;
pub use store::*;
