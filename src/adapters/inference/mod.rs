//! Reproduction command inference adapters.

pub mod manifest;

pub use manifest::ManifestReproductionInferrer;
