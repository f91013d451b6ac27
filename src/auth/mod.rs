//! Authentication and Authorization
//!
//! Backends turn request credentials into an actor; the policy decides what
//! that actor may do.

pub mod backend;
pub mod policy;

pub use backend::*;
pub use policy::*;
