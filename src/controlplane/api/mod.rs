//! API Module
//!
//! Provides the REST API for network lifecycle management and the server
//! that hosts it.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
