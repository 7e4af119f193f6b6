//! Remedy - autonomous repair loop orchestrator
//!
//! Remedy drives an error description through diagnosis, planning, optional
//! decomposition into a dependency graph of sub-problems, patch execution and
//! verification, bounding the loop with complexity-trend analysis, loop
//! detection and recorded reliability telemetry.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits
//! - **Service Layer** (`services`): phase coordinator, DAG executor,
//!   convergence engine, loop detector, telemetry and recovery
//! - **Adapters** (`adapters`): SQLite persistence, sandboxes, inference and
//!   scripted test doubles
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator commands
//!
//! # Example
//!
//! ```ignore
//! use remedy::{RepairRequest, RepairService};
//!
//! async fn repair(service: &RepairService) -> anyhow::Result<()> {
//!     let run_id = service.start_run(RepairRequest::new("error[E0308]: mismatched types")).await?;
//!     let state = service.wait_for_run(run_id).await?;
//!     println!("{}: {:?}", state.status, state.message);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DagValidationError, DomainError, DomainResult};
pub use domain::models::{
    Config, Diagnosis, ErrorDag, ErrorNode, ReliabilityLayer, RepairRequest, RunPhase, RunState,
    RunStatus,
};
pub use domain::ports::{
    DecompositionProvider, DiagnosisProvider, PatchProvider, PlanningProvider, ReproductionInferrer,
    RunObserver, Sandbox, SandboxFactory,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ConvergenceEngine, DagExecutor, LoopDetector, PhaseCoordinator, RecoveryOrchestrator,
    ReliabilityTelemetry, RepairService,
};
