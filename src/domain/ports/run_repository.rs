//! Repository port for repair runs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RunState, RunStatus};

/// Durable record of repair runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or replace the stored state of a run.
    async fn save(&self, run: &RunState) -> DomainResult<()>;

    /// Get a run by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<RunState>>;

    /// List runs with the given status, newest first.
    async fn list_by_status(&self, status: RunStatus) -> DomainResult<Vec<RunState>>;
}
