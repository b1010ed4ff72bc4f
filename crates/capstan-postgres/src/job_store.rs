//! [`PgJobStore`]: the `capstan_jobs` table boundary (§6 schema, §4.1
//! claim query).
//!
//! Every multi-row mutation here is a single `UPDATE ... FROM (SELECT ...
//! FOR UPDATE SKIP LOCKED)` statement, which Postgres already runs as one
//! atomic unit — no explicit `BEGIN`/`COMMIT` needed, mirroring the claim
//! query in `other_examples/8f6cd3e7_thalamiq-zunder__apps-server-src-queue-postgres.rs.rs`.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use capstan_core::{CapstanError, Job, JobState, NewJob, StagedJob, Transition};
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::str::FromStr;

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, CapstanError> {
    let state_str: String = row.try_get("state").map_err(|e| map_sqlx_error(e))?;
    let state = JobState::from_str(&state_str)
        .map_err(|e| CapstanError::TransientStorageError(e.to_string()))?;
    let errors_json: serde_json::Value = row.try_get("errors").map_err(|e| map_sqlx_error(e))?;
    let errors = serde_json::from_value(errors_json)
        .map_err(|e| CapstanError::TransientStorageError(format!("malformed errors column: {e}")))?;

    Ok(Job {
        id: row.try_get("id").map_err(|e| map_sqlx_error(e))?,
        state,
        queue: row.try_get("queue").map_err(|e| map_sqlx_error(e))?,
        worker: row.try_get("worker").map_err(|e| map_sqlx_error(e))?,
        args: row.try_get("args").map_err(|e| map_sqlx_error(e))?,
        meta: row.try_get("meta").map_err(|e| map_sqlx_error(e))?,
        tags: row.try_get("tags").map_err(|e| map_sqlx_error(e))?,
        attempt: row.try_get("attempt").map_err(|e| map_sqlx_error(e))?,
        max_attempts: row.try_get("max_attempts").map_err(|e| map_sqlx_error(e))?,
        priority: row.try_get("priority").map_err(|e| map_sqlx_error(e))?,
        errors,
        attempted_by: row.try_get("attempted_by").map_err(|e| map_sqlx_error(e))?,
        inserted_at: row.try_get("inserted_at").map_err(|e| map_sqlx_error(e))?,
        scheduled_at: row.try_get("scheduled_at").map_err(|e| map_sqlx_error(e))?,
        attempted_at: row.try_get("attempted_at").map_err(|e| map_sqlx_error(e))?,
        completed_at: row.try_get("completed_at").map_err(|e| map_sqlx_error(e))?,
        cancelled_at: row.try_get("cancelled_at").map_err(|e| map_sqlx_error(e))?,
        discarded_at: row.try_get("discarded_at").map_err(|e| map_sqlx_error(e))?,
    })
}

#[async_trait]
impl capstan_core::JobStore for PgJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job, CapstanError> {
        let state = if job.scheduled_at <= Utc::now() {
            JobState::Available
        } else {
            JobState::Scheduled
        };

        let row = sqlx::query(
            r#"
            INSERT INTO capstan_jobs
                (state, queue, worker, args, meta, tags, max_attempts, priority, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(state.as_str())
        .bind(&job.queue)
        .bind(&job.worker)
        .bind(&job.args)
        .bind(&job.meta)
        .bind(&job.tags)
        .bind(job.max_attempts)
        .bind(job.priority)
        .bind(job.scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row_to_job(&row)
    }

    async fn claim(&self, queue: &str, demand: usize, node: &str) -> Result<Vec<Job>, CapstanError> {
        if demand == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id FROM capstan_jobs
                WHERE state = 'available' AND queue = $1 AND scheduled_at <= NOW()
                ORDER BY priority ASC, scheduled_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE capstan_jobs
            SET state = 'executing',
                attempt = attempt + 1,
                attempted_at = NOW(),
                attempted_by = array_append(attempted_by, $3)
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(demand as i64)
        .bind(node)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn stage(&self, limit: usize) -> Result<Vec<StagedJob>, CapstanError> {
        let rows = sqlx::query(
            r#"
            WITH staged AS (
                SELECT id FROM capstan_jobs
                WHERE state IN ('scheduled', 'retryable') AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE capstan_jobs
            SET state = 'available'
            WHERE id IN (SELECT id FROM staged)
            RETURNING id, queue, worker
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(StagedJob {
                    id: row.try_get("id").map_err(|e| map_sqlx_error(e))?,
                    queue: row.try_get("queue").map_err(|e| map_sqlx_error(e))?,
                    worker: row.try_get("worker").map_err(|e| map_sqlx_error(e))?,
                })
            })
            .collect()
    }

    async fn finalize(&self, id: i64, transition: Transition) -> Result<Job, CapstanError> {
        let row = match transition {
            Transition::Complete => sqlx::query(
                r#"
                UPDATE capstan_jobs SET state = 'completed', completed_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?,

            Transition::Retry { scheduled_at, error } => sqlx::query(
                r#"
                UPDATE capstan_jobs
                SET state = 'retryable',
                    scheduled_at = $2,
                    errors = errors || jsonb_build_array(jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $3))
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(scheduled_at)
            .bind(&error)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?,

            Transition::Discard { error } => sqlx::query(
                r#"
                UPDATE capstan_jobs
                SET state = 'discarded',
                    discarded_at = NOW(),
                    errors = errors || jsonb_build_array(jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $2))
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(&error)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?,

            Transition::Cancel { reason } => sqlx::query(
                r#"
                UPDATE capstan_jobs
                SET state = 'cancelled',
                    cancelled_at = NOW(),
                    errors = errors || jsonb_build_array(jsonb_build_object('attempt', attempt, 'at', NOW(), 'error', $2))
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(&reason)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?,

            Transition::Snooze { scheduled_at } => sqlx::query(
                r#"
                UPDATE capstan_jobs
                SET state = 'scheduled',
                    scheduled_at = $2,
                    max_attempts = max_attempts + 1
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(scheduled_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?,
        };

        row_to_job(&row)
    }

    async fn cancel(&self, id: i64) -> Result<Job, CapstanError> {
        let updated = sqlx::query(
            r#"
            UPDATE capstan_jobs
            SET state = 'cancelled', cancelled_at = NOW()
            WHERE id = $1 AND state NOT IN ('completed', 'discarded', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match updated {
            Some(row) => row_to_job(&row),
            None => {
                let row = sqlx::query("SELECT * FROM capstan_jobs WHERE id = $1")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
                row_to_job(&row)
            }
        }
    }

    async fn retry(&self, id: i64) -> Result<Job, CapstanError> {
        let row = sqlx::query(
            r#"
            UPDATE capstan_jobs
            SET state = 'available',
                max_attempts = GREATEST(max_attempts, attempt + 1)
            WHERE id = $1 AND state IN ('completed', 'discarded', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row_to_job(&row)
    }

    async fn fetch_job(&self, id: i64) -> Result<Option<Job>, CapstanError> {
        let row = sqlx::query("SELECT * FROM capstan_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_job).transpose()
    }
}
