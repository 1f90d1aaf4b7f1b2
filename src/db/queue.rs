use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::ParseJob;
use crate::services::queue::{JobStore, QueueError, ResumeRequest};

/// Appends `$2` to `error_message` with a `; ` separator.
const APPEND_NOTE: &str = "CASE WHEN error_message IS NULL OR error_message = '' THEN $2 \
                           ELSE error_message || '; ' || $2 END";

/// `parse_queue` backed by Postgres. Each call checks out a pooled
/// connection and returns it before the caller does any browser work.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &ParseJob) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO parse_queue (id, status, task_type, url, business_id, account_id, user_id,
                                     retry_after, warnings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(&job.task_type)
        .bind(&job.url)
        .bind(&job.business_id)
        .bind(&job.account_id)
        .bind(&job.user_id)
        .bind(job.retry_after)
        .bind(Json(&job.warnings))
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ParseJob>, QueueError> {
        let row = sqlx::query("SELECT * FROM parse_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(ParseJob::from_row).transpose()?)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        task_types: &[&str],
    ) -> Result<Option<ParseJob>, QueueError> {
        let task_types: Vec<String> = task_types.iter().map(|t| t.to_string()).collect();
        let row = sqlx::query(
            r#"
            UPDATE parse_queue
            SET status = 'processing', updated_at = NOW()
            WHERE id = (
                SELECT id FROM parse_queue
                WHERE task_type = ANY($2)
                  AND (
                        (status = 'pending' AND (retry_after IS NULL OR retry_after <= $1))
                     OR (status = 'captcha' AND captcha_status = 'waiting'
                         AND (resume_requested OR (retry_after IS NOT NULL AND retry_after <= $1)))
                  )
                ORDER BY CASE status WHEN 'pending' THEN 0 WHEN 'captcha' THEN 1 ELSE 2 END,
                         created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(task_types)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(ParseJob::from_row).transpose()?)
    }

    async fn expired_captcha_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParseJob>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM parse_queue
            WHERE status = 'captcha' AND captcha_started_at < $1
            ORDER BY captcha_started_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| ParseJob::from_row(r).map_err(QueueError::from))
            .collect()
    }

    async fn expire_captcha(&self, id: Uuid, note: &str) -> Result<bool, QueueError> {
        let sql = format!(
            r#"
            UPDATE parse_queue
            SET status = 'pending',
                captcha_status = 'expired',
                captcha_required = FALSE,
                captcha_url = NULL,
                captcha_session_id = NULL,
                captcha_started_at = NULL,
                resume_requested = FALSE,
                retry_after = NULL,
                error_message = {APPEND_NOTE},
                updated_at = NOW()
            WHERE id = $1 AND status = 'captcha'
            "#
        );
        let result = sqlx::query(&sql).bind(id).bind(note).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_captcha(
        &self,
        id: Uuid,
        session_id: Option<&str>,
        captcha_url: &str,
        retry_after: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE parse_queue
            SET status = 'captcha',
                captcha_status = 'waiting',
                captcha_required = TRUE,
                captcha_session_id = $2,
                captcha_url = $3,
                captcha_started_at = COALESCE(captcha_started_at, NOW()),
                resume_requested = FALSE,
                retry_after = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(captcha_url)
        .bind(retry_after)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_to_pending(&self, id: Uuid, note: &str) -> Result<bool, QueueError> {
        let sql = format!(
            r#"
            UPDATE parse_queue
            SET status = 'pending',
                captcha_status = NULL,
                captcha_required = FALSE,
                captcha_url = NULL,
                captcha_session_id = NULL,
                captcha_started_at = NULL,
                resume_requested = FALSE,
                retry_after = NULL,
                error_message = {APPEND_NOTE},
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#
        );
        let result = sqlx::query(&sql).bind(id).bind(note).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE parse_queue
            SET status = 'completed',
                error_message = NULL,
                warnings = $2,
                captcha_required = FALSE,
                captcha_status = NULL,
                captcha_url = NULL,
                captcha_session_id = NULL,
                captcha_started_at = NULL,
                resume_requested = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(Json(warnings))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE parse_queue
            SET status = 'error',
                error_message = $2,
                captcha_required = FALSE,
                captcha_status = NULL,
                captcha_session_id = NULL,
                captcha_started_at = NULL,
                resume_requested = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn request_resume(&self, id: Uuid) -> Result<ResumeRequest, QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE parse_queue
            SET resume_requested = TRUE, updated_at = NOW()
            WHERE id = $1 AND status = 'captcha'
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        if updated.is_some() {
            return Ok(ResumeRequest::Accepted);
        }

        let exists = sqlx::query("SELECT EXISTS (SELECT 1 FROM parse_queue WHERE id = $1) AS found")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let found: bool = exists.try_get("found")?;
        Ok(if found {
            ResumeRequest::NotWaiting
        } else {
            ResumeRequest::NotFound
        })
    }
}
