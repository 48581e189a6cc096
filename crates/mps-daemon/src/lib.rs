//! mps-daemon library target.
//!
//! Exposes the router, state and catalog client for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod catalog;
pub mod routes;
pub mod state;
