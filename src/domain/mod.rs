//! Domain layer for the remedy repair loop
//!
//! Core models, errors and the port traits external collaborators implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DagValidationError, DomainError, DomainResult};
