use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{EnqueueRequest, EnqueueResponse, JobStatusResponse};
use crate::models::job::{ParseJob, TaskKind};
use crate::services::queue::ResumeRequest;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "Job route failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
}

/// POST /api/v1/jobs: enqueue a parse job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    request
        .validate()
        .map_err(|report| (StatusCode::UNPROCESSABLE_ENTITY, report.to_string()))?;

    let task_type = request
        .task_type
        .as_deref()
        .unwrap_or(TaskKind::PARSE_CARD);
    if task_type == TaskKind::PARSE_CARD && request.url.is_none() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "url: required for parse_card jobs".to_string(),
        ));
    }

    let mut job = ParseJob::pending(task_type, request.url, Some(request.business_id));
    job.user_id = request.user_id;
    state.jobs.insert(&job).await.map_err(internal)?;

    tracing::info!(job_id = %job.id, task_type, "Parse job enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.id,
            status: job.status.to_string(),
            message: "Parse job queued".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: job status for operators.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    match state.jobs.get(job_id).await.map_err(internal)? {
        Some(job) => Ok(Json(job.into())),
        None => Err((StatusCode::NOT_FOUND, format!("job {job_id} not found"))),
    }
}

/// POST /api/v1/jobs/{job_id}/resume: a human solved the captcha.
pub async fn request_resume(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.jobs.request_resume(job_id).await.map_err(internal)? {
        ResumeRequest::Accepted => {
            tracing::info!(job_id = %job_id, "Captcha resume requested");
            Ok(StatusCode::ACCEPTED)
        }
        ResumeRequest::NotFound => Err((StatusCode::NOT_FOUND, format!("job {job_id} not found"))),
        ResumeRequest::NotWaiting => Err((
            StatusCode::CONFLICT,
            format!("job {job_id} is not waiting on a captcha"),
        )),
    }
}
