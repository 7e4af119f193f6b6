//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Persistence, sandboxes and
//! inference live in `adapters`.

pub mod config;
pub mod logging;
