//! Fakes and a wiring harness for end-to-end sync scenarios.
//!
//! Everything runs in-process: marketplaces are [`ScriptedAdapter`]s, the
//! catalog is a [`FlakyCatalog`] over the in-memory catalog, and all state
//! stores are the in-memory implementations.

pub mod catalog;
pub mod fixtures;
pub mod harness;
pub mod scripted;

pub use catalog::FlakyCatalog;
pub use harness::Harness;
pub use scripted::ScriptedAdapter;
