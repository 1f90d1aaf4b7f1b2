use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{ParseJob, TaskKind};
use crate::services::urls;

/// Request to enqueue a parse job.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[garde(custom(map_url))]
    pub url: Option<String>,

    #[garde(length(min = 1, max = 64))]
    pub business_id: String,

    #[garde(inner(length(min = 1, max = 64)))]
    pub user_id: Option<String>,

    #[garde(custom(task_type))]
    pub task_type: Option<String>,
}

fn map_url(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value {
        Some(url) if url.len() > 2048 => Err(garde::Error::new("url is too long")),
        Some(url) if urls::org_id(url).is_none() => {
            Err(garde::Error::new("url does not reference a Yandex organization"))
        }
        _ => Ok(()),
    }
}

fn task_type(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value.as_deref().map(str::parse::<TaskKind>) {
        None | Some(Ok(TaskKind::ParseCard)) | Some(Ok(TaskKind::CabinetFallback)) => Ok(()),
        Some(Ok(TaskKind::Sync(_))) => Err(garde::Error::new("sync jobs are not scrape jobs")),
        Some(Err(e)) => Err(garde::Error::new(e.to_string())),
    }
}

/// Response after enqueueing.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// Operator view of a job.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub task_type: String,
    pub captcha_status: Option<String>,
    pub captcha_url: Option<String>,
    pub resume_requested: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl From<ParseJob> for JobStatusResponse {
    fn from(job: ParseJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status.to_string(),
            task_type: job.task_type,
            captcha_status: job.captcha_status.map(|s| s.to_string()),
            captcha_url: job.captcha_url,
            resume_requested: job.resume_requested,
            error: job.error_message,
            warnings: job.warnings,
        }
    }
}
