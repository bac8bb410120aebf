//! Run repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use runlog_core::{Error, ListRunsQuery, Result, Run, RunId, RunRepository};

use crate::escape_like;

const RUN_COLUMNS: &str = "id, legacy_id, created_at, note";

/// PostgreSQL implementation of RunRepository.
#[derive(Clone)]
pub struct PgRunRepository {
    pool: Pool<Postgres>,
}

impl PgRunRepository {
    /// Create a new PgRunRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Column a [`RunId`] is matched against; always bound as `$1`.
fn id_predicate(id: &RunId) -> &'static str {
    match id {
        RunId::Modern(_) => "id = $1",
        RunId::Legacy(_) => "legacy_id = $1",
    }
}

/// Bind a [`RunId`] with its native column type.
fn bind_id<'q>(
    query: Query<'q, Postgres, PgArguments>,
    id: &RunId,
) -> Query<'q, Postgres, PgArguments> {
    match *id {
        RunId::Modern(uuid) => query.bind(uuid),
        RunId::Legacy(n) => query.bind(n),
    }
}

fn run_from_row(row: &PgRow) -> Result<Run> {
    let legacy_id: Option<i64> = row.try_get("legacy_id")?;
    let id = match legacy_id {
        Some(n) => RunId::Legacy(n),
        None => RunId::Modern(row.try_get::<Uuid, _>("id")?),
    };
    Ok(Run {
        id,
        created_at: row.try_get("created_at")?,
        note: row.try_get("note")?,
    })
}

fn not_found(id: &RunId) -> Error {
    Error::NotFound(format!("Run {} not found", id))
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn insert(&self, note: &str) -> Result<Run> {
        let sql = format!("INSERT INTO runs (note) VALUES ($1) RETURNING {}", RUN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(note)
            .fetch_one(&self.pool)
            .await?;
        let run = run_from_row(&row)?;

        debug!(
            subsystem = "db",
            component = "runs",
            op = "insert",
            run_id = %run.id,
            "Run inserted"
        );
        Ok(run)
    }

    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {} FROM runs \
             WHERE ($3::text IS NULL OR note ILIKE '%' || $3 || '%' ESCAPE '\\') \
             ORDER BY created_at DESC, id \
             LIMIT $1 OFFSET $2",
            RUN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(query.limit)
            .bind(query.offset)
            .bind(query.filter().map(escape_like))
            .fetch_all(&self.pool)
            .await?;

        let runs = rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "runs",
            op = "list",
            limit = query.limit,
            offset = query.offset,
            filtered = query.filter.is_some(),
            result_count = runs.len(),
            "Runs listed"
        );
        Ok(runs)
    }

    async fn fetch(&self, id: &RunId) -> Result<Run> {
        let sql = format!("SELECT {} FROM runs WHERE {}", RUN_COLUMNS, id_predicate(id));
        let row = bind_id(sqlx::query(&sql), id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))?;
        run_from_row(&row)
    }

    async fn update(&self, id: &RunId, note: &str) -> Result<Run> {
        let sql = format!(
            "UPDATE runs SET note = $2 WHERE {} RETURNING {}",
            id_predicate(id),
            RUN_COLUMNS
        );
        let row = bind_id(sqlx::query(&sql), id)
            .bind(note)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(id))?;

        debug!(
            subsystem = "db",
            component = "runs",
            op = "update",
            run_id = %id,
            id_kind = id.kind(),
            "Run updated"
        );
        run_from_row(&row)
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        let sql = format!("DELETE FROM runs WHERE {}", id_predicate(id));
        let result = bind_id(sqlx::query(&sql), id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }

        debug!(
            subsystem = "db",
            component = "runs",
            op = "delete",
            run_id = %id,
            id_kind = id.kind(),
            "Run deleted"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<DateTime<Utc>> {
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&self.pool)
            .await?;
        Ok(now)
    }
}
