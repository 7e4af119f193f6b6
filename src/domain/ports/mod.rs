//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces external collaborators implement:
//! - Diagnosis / planning / decomposition / patch providers
//! - ReproductionInferrer: reproduction command inference
//! - Sandbox / SandboxFactory: isolated execution per run
//! - ReliabilityRepository / RunRepository: persistence
//! - RunObserver: progress reporting
//!
//! The coordinator only ever talks to these traits, never to concrete adapters.

pub mod observer;
pub mod providers;
pub mod reliability_repository;
pub mod run_repository;
pub mod sandbox;

pub use observer::{RunObserver, TracingObserver};
pub use providers::{
    DecompositionProvider, DiagnosisProvider, PatchProvider, PlanningProvider,
    ReproductionInferrer,
};
pub use reliability_repository::ReliabilityRepository;
pub use run_repository::RunRepository;
pub use sandbox::{Sandbox, SandboxFactory};
