//! SQLite implementation of the ReliabilityRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventFilter, RecoveryOutcome, ReliabilityEvent};
use crate::domain::ports::ReliabilityRepository;

use super::{format_timestamp, parse_datetime, parse_optional_uuid, parse_uuid};

const EVENT_COLUMNS: &str = "id, layer, triggered, threshold, context, outcome, recovery_attempted, \
     recovery_strategy, recovery_success, agent_run_id, created_at";

#[derive(Clone)]
pub struct SqliteReliabilityRepository {
    pool: SqlitePool,
}

impl SqliteReliabilityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReliabilityRepository for SqliteReliabilityRepository {
    async fn insert(&self, event: &ReliabilityEvent) -> DomainResult<()> {
        let context_json = serde_json::to_string(&event.context)?;

        sqlx::query(
            r#"INSERT INTO reliability_events (id, layer, triggered, threshold, context, outcome,
               recovery_attempted, recovery_strategy, recovery_success, agent_run_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.layer.as_str())
        .bind(event.triggered)
        .bind(event.threshold)
        .bind(&context_json)
        .bind(event.outcome.as_str())
        .bind(event.recovery_attempted)
        .bind(&event.recovery_strategy)
        .bind(event.recovery_success)
        .bind(event.agent_run_id.map(|id| id.to_string()))
        .bind(format_timestamp(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ReliabilityEvent>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM reliability_events WHERE id = ?");
        let row: Option<ReliabilityEventRow> = sqlx::query_as(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_recovery(&self, id: Uuid, strategy: &str, success: bool) -> DomainResult<()> {
        let outcome = if success {
            RecoveryOutcome::Recovered
        } else {
            RecoveryOutcome::Failed
        };

        let result = sqlx::query(
            r#"UPDATE reliability_events
               SET recovery_attempted = 1, recovery_strategy = ?, recovery_success = ?, outcome = ?
               WHERE id = ?"#,
        )
        .bind(strategy)
        .bind(success)
        .bind(outcome.as_str())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::EventNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn list(&self, filter: &EventFilter) -> DomainResult<Vec<ReliabilityEvent>> {
        let mut query = format!("SELECT {EVENT_COLUMNS} FROM reliability_events WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(layer) = &filter.layer {
            query.push_str(" AND layer = ?");
            bindings.push(layer.as_str().to_string());
        }

        if let Some(since) = &filter.since {
            query.push_str(" AND created_at >= ?");
            bindings.push(format_timestamp(since));
        }

        if let Some(run_id) = &filter.agent_run_id {
            query.push_str(" AND agent_run_id = ?");
            bindings.push(run_id.to_string());
        }

        query.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut q = sqlx::query_as::<_, ReliabilityEventRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<ReliabilityEventRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM reliability_events WHERE created_at < ?")
            .bind(format_timestamp(&cutoff))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct ReliabilityEventRow {
    id: String,
    layer: String,
    triggered: bool,
    threshold: i64,
    context: String,
    outcome: String,
    recovery_attempted: bool,
    recovery_strategy: Option<String>,
    recovery_success: Option<bool>,
    agent_run_id: Option<String>,
    created_at: String,
}

impl TryFrom<ReliabilityEventRow> for ReliabilityEvent {
    type Error = DomainError;

    fn try_from(row: ReliabilityEventRow) -> Result<Self, Self::Error> {
        Ok(ReliabilityEvent {
            id: parse_uuid(&row.id)?,
            layer: row.layer.parse().map_err(DomainError::SerializationError)?,
            triggered: row.triggered,
            threshold: row.threshold,
            context: serde_json::from_str(&row.context)?,
            outcome: row.outcome.parse().map_err(DomainError::SerializationError)?,
            recovery_attempted: row.recovery_attempted,
            recovery_strategy: row.recovery_strategy,
            recovery_success: row.recovery_success,
            agent_run_id: parse_optional_uuid(row.agent_run_id)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{NewReliabilityEvent, ReliabilityLayer};
    use chrono::Duration;

    async fn setup() -> SqliteReliabilityRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteReliabilityRepository::new(pool)
    }

    fn event(layer: ReliabilityLayer, triggered: bool) -> ReliabilityEvent {
        NewReliabilityEvent {
            layer,
            triggered,
            threshold: 1,
            context: serde_json::json!({"reason": "no reproduction command"}),
            agent_run_id: Some(Uuid::new_v4()),
        }
        .into_event()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = setup().await;
        let event = event(ReliabilityLayer::Phase2Reproduction, true);
        repo.insert(&event).await.unwrap();

        let stored = repo.get(event.id).await.unwrap().unwrap();
        assert_eq!(stored.layer, event.layer);
        assert!(stored.triggered);
        assert_eq!(stored.threshold, 1);
        assert_eq!(stored.context, event.context);
        assert_eq!(stored.outcome, RecoveryOutcome::Pending);
        assert_eq!(stored.agent_run_id, event.agent_run_id);
        assert!((stored.created_at - event.created_at).num_milliseconds().abs() < 1);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_recovery() {
        let repo = setup().await;
        let event = event(ReliabilityLayer::Phase3LoopDetection, true);
        repo.insert(&event).await.unwrap();

        repo.update_recovery(event.id, "switch-mode", false).await.unwrap();

        let stored = repo.get(event.id).await.unwrap().unwrap();
        assert!(stored.recovery_attempted);
        assert_eq!(stored.recovery_strategy.as_deref(), Some("switch-mode"));
        assert_eq!(stored.recovery_success, Some(false));
        assert_eq!(stored.outcome, RecoveryOutcome::Failed);
    }

    #[tokio::test]
    async fn test_update_recovery_unknown_event() {
        let repo = setup().await;
        let result = repo.update_recovery(Uuid::new_v4(), "request-human", true).await;
        assert!(matches!(result, Err(DomainError::EventNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_oldest_first() {
        let repo = setup().await;
        let now = Utc::now();

        let mut old = event(ReliabilityLayer::Phase2Reproduction, true);
        old.created_at = now - Duration::days(10);
        let mut recent = event(ReliabilityLayer::Phase2Reproduction, false);
        recent.created_at = now - Duration::hours(1);
        let other_layer = event(ReliabilityLayer::Phase3LoopDetection, true);

        repo.insert(&recent).await.unwrap();
        repo.insert(&old).await.unwrap();
        repo.insert(&other_layer).await.unwrap();

        let all_phase2 = repo
            .list(&EventFilter::layer(ReliabilityLayer::Phase2Reproduction))
            .await
            .unwrap();
        assert_eq!(
            all_phase2.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![old.id, recent.id]
        );

        let windowed = repo
            .list(
                &EventFilter::layer(ReliabilityLayer::Phase2Reproduction)
                    .since(Some(now - Duration::days(1))),
            )
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, recent.id);

        let by_run = repo
            .list(&EventFilter {
                agent_run_id: other_layer.agent_run_id,
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_run.len(), 1);
        assert_eq!(by_run[0].id, other_layer.id);
    }

    #[tokio::test]
    async fn test_delete_before() {
        let repo = setup().await;
        let now = Utc::now();

        let mut stale = event(ReliabilityLayer::Phase3LoopDetection, false);
        stale.created_at = now - Duration::days(45);
        let fresh = event(ReliabilityLayer::Phase3LoopDetection, false);
        repo.insert(&stale).await.unwrap();
        repo.insert(&fresh).await.unwrap();

        let deleted = repo.delete_before(now - Duration::days(30)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get(stale.id).await.unwrap().is_none());
        assert!(repo.get(fresh.id).await.unwrap().is_some());
    }
}
