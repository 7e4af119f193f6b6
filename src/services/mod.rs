//! Service layer: the repair loop's control logic.
//!
//! Leaf-first: convergence engine, loop detector and DAG executor have no
//! dependencies; telemetry depends on a repository port; recovery depends on
//! telemetry; the phase coordinator depends on all of them.

pub mod convergence_engine;
pub mod dag_executor;
pub mod loop_detector;
pub mod phase_coordinator;
pub mod recovery_orchestrator;
pub mod reliability_telemetry;
pub mod repair_service;

pub use convergence_engine::{ComplexityInputs, ComplexityTrend, ConvergenceEngine, ConvergenceReport};
pub use dag_executor::DagExecutor;
pub use loop_detector::{content_checksum, error_fingerprint, LoopDetector};
pub use phase_coordinator::{PhaseCoordinator, RepairPorts, RepairSession, SandboxLease};
pub use recovery_orchestrator::{RecoveryOrchestrator, RecoveryStrategy};
pub use reliability_telemetry::ReliabilityTelemetry;
pub use repair_service::RepairService;
