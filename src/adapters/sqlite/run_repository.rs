//! SQLite implementation of the RunRepository.
//!
//! The full run state is stored as JSON; status, phase and iteration are
//! duplicated into columns for listing.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RunState, RunStatus};
use crate::domain::ports::RunRepository;

use super::format_timestamp;

#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn save(&self, run: &RunState) -> DomainResult<()> {
        let state_json = serde_json::to_string(run)?;

        sqlx::query(
            r#"INSERT INTO repair_runs (id, name, status, phase, iteration, state_json, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   status = excluded.status,
                   phase = excluded.phase,
                   iteration = excluded.iteration,
                   state_json = excluded.state_json,
                   updated_at = excluded.updated_at"#,
        )
        .bind(run.id.to_string())
        .bind(&run.name)
        .bind(run.status.as_str())
        .bind(run.phase.as_str())
        .bind(i64::from(run.iteration))
        .bind(&state_json)
        .bind(format_timestamp(&run.created_at))
        .bind(format_timestamp(&run.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<RunState>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT state_json FROM repair_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_status(&self, status: RunStatus) -> DomainResult<Vec<RunState>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT state_json FROM repair_runs WHERE status = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    state_json: String,
}

impl TryFrom<RunRow> for RunState {
    type Error = DomainError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(serde_json::from_str(&row.state_json)?)
    }
}
