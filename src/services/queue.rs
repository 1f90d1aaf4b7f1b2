use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::ParseJob;

/// Result of an operator's resume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeRequest {
    Accepted,
    NotFound,
    /// The job exists but is not waiting on a captcha.
    NotWaiting,
}

/// Postgres-style parse queue with leasing by status flip.
///
/// Every transition out of `processing` is guarded on the job still being in
/// `processing`, and captcha expiry on it still being in `captcha`. Guarded
/// updates return `false` when the guard did not match.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &ParseJob) -> Result<(), QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<ParseJob>, QueueError>;

    /// Atomically flip the next eligible job of the given kinds to `processing`.
    ///
    /// Eligible: `pending` with `retry_after` unset or due, or `captcha`/`waiting`
    /// with `resume_requested` set or `retry_after` due. Pending first, then
    /// captcha, oldest `created_at` first within each class.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        task_types: &[&str],
    ) -> Result<Option<ParseJob>, QueueError>;

    /// Captcha jobs whose challenge started before `cutoff`.
    async fn expired_captcha_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParseJob>, QueueError>;

    /// Reset an expired captcha job to `pending`, clearing captcha state.
    async fn expire_captcha(&self, id: Uuid, note: &str) -> Result<bool, QueueError>;

    async fn mark_captcha(
        &self,
        id: Uuid,
        session_id: Option<&str>,
        captcha_url: &str,
        retry_after: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Back to `pending` with captcha state cleared (session lost).
    async fn reset_to_pending(&self, id: Uuid, note: &str) -> Result<bool, QueueError>;

    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> Result<bool, QueueError>;

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<bool, QueueError>;

    async fn request_resume(&self, id: Uuid) -> Result<ResumeRequest, QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
