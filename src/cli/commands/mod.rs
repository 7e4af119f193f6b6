//! CLI command implementations.

pub mod dag;
pub mod reliability;
