//! Provider ports - diagnosis, planning, decomposition and patch generation.
//!
//! These turn an error description into a diagnosis, plan or code patch. How a
//! fix is generated or judged correct is entirely up to the implementation.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Decomposition, Diagnosis, DiagnosisRequest, FixRequest, InferredCommand, JudgeRequest,
    Judgement, Plan,
};

/// Turns a failure description into a diagnosis.
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    async fn diagnose(&self, request: &DiagnosisRequest) -> DomainResult<Diagnosis>;
}

/// Turns a diagnosis into an ordered plan.
#[async_trait]
pub trait PlanningProvider: Send + Sync {
    async fn plan(&self, diagnosis: &Diagnosis) -> DomainResult<Plan>;
}

/// Decides whether a diagnosed problem should be split into sub-problems.
#[async_trait]
pub trait DecompositionProvider: Send + Sync {
    async fn decompose(&self, diagnosis: &Diagnosis) -> DomainResult<Decomposition>;
}

/// Generates and judges code fixes.
#[async_trait]
pub trait PatchProvider: Send + Sync {
    /// Produce the full new content of the target file.
    async fn generate_fix(&self, request: &FixRequest) -> DomainResult<String>;

    /// Judge a verified fix.
    async fn judge_fix(&self, request: &JudgeRequest) -> DomainResult<Judgement>;
}

/// Infers a reproduction command for a repository.
#[async_trait]
pub trait ReproductionInferrer: Send + Sync {
    /// Returns `None` when no command could be inferred.
    async fn infer(&self, repository_path: &std::path::Path) -> DomainResult<Option<InferredCommand>>;
}
