//! Domain models for the repair loop.

pub mod collaboration;
pub mod config;
pub mod dag;
pub mod loop_state;
pub mod recovery;
pub mod reliability;
pub mod run;

pub use collaboration::{
    CommandResult, Decomposition, Diagnosis, DiagnosisRequest, ErrorCategory, FixRequest,
    InferredCommand, JudgeRequest, Judgement, Plan,
};
pub use config::{
    Config, ConvergenceConfig, CoordinatorConfig, DatabaseConfig, LoggingConfig, RecoveryConfig,
    SandboxConfig, SandboxMode, TelemetryConfig,
};
pub use dag::{DagEdge, DagProgress, ErrorDag, ErrorNode};
pub use loop_state::{LoopDetection, LoopStateSnapshot};
pub use recovery::{RecoveryContext, RecoveryResult, StrategyAttempt};
pub use reliability::{
    DashboardSummary, EventFilter, LayerSummary, NewReliabilityEvent, RecoveryOutcome,
    ReliabilityEvent, ReliabilityLayer, StrategyStats, ThresholdAnalysis,
};
pub use run::{LogLevel, RepairRequest, RunPhase, RunState, RunStateDelta, RunStatus};
