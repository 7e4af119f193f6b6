//! Repository port for reliability events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EventFilter, ReliabilityEvent};

/// Durable storage for reliability telemetry.
#[async_trait]
pub trait ReliabilityRepository: Send + Sync {
    /// Insert a new event.
    async fn insert(&self, event: &ReliabilityEvent) -> DomainResult<()>;

    /// Get an event by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<ReliabilityEvent>>;

    /// Record the outcome of a recovery attempt on an event.
    async fn update_recovery(&self, id: Uuid, strategy: &str, success: bool) -> DomainResult<()>;

    /// List events matching the filter, oldest first.
    async fn list(&self, filter: &EventFilter) -> DomainResult<Vec<ReliabilityEvent>>;

    /// Delete events created before `cutoff`, returning how many were removed.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
