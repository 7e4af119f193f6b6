//! Infrastructure adapters for external systems.

pub mod inference;
pub mod mock;
pub mod sandbox;
pub mod sqlite;
