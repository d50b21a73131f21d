//! Infrastructure adapters for external systems.

pub mod agents;
pub mod memory;
pub mod sandbox;
pub mod sqlite;
