use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a parse job in the queue table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Captcha,
    Completed,
    Error,
}

/// Sub-state of a job parked on a captcha.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CaptchaStatus {
    Waiting,
    Expired,
}

/// Kind of work a queue row asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    ParseCard,
    CabinetFallback,
    /// `sync_<source>`, consumed outside the scrape worker.
    Sync(String),
}

impl TaskKind {
    pub const PARSE_CARD: &'static str = "parse_card";
    pub const CABINET_FALLBACK: &'static str = "cabinet_fallback";
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::ParseCard => f.write_str(Self::PARSE_CARD),
            TaskKind::CabinetFallback => f.write_str(Self::CABINET_FALLBACK),
            TaskKind::Sync(source) => write!(f, "sync_{source}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::PARSE_CARD => Ok(TaskKind::ParseCard),
            Self::CABINET_FALLBACK => Ok(TaskKind::CabinetFallback),
            other => match other.strip_prefix("sync_") {
                Some(source) if !source.is_empty() => Ok(TaskKind::Sync(source.to_string())),
                _ => Err(UnknownTaskKind(other.to_string())),
            },
        }
    }
}

/// One row of the `parse_queue` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub task_type: String,
    pub url: Option<String>,
    pub business_id: Option<String>,
    pub account_id: Option<String>,
    pub user_id: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    pub captcha_required: bool,
    pub captcha_url: Option<String>,
    pub captcha_session_id: Option<String>,
    pub captcha_started_at: Option<DateTime<Utc>>,
    pub captcha_status: Option<CaptchaStatus>,
    pub resume_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParseJob {
    /// A fresh pending job, as an enqueuer would insert it.
    pub fn pending(task_type: &str, url: Option<String>, business_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            task_type: task_type.to_string(),
            url,
            business_id,
            account_id: None,
            user_id: None,
            retry_after: None,
            error_message: None,
            warnings: Vec::new(),
            captcha_required: false,
            captcha_url: None,
            captcha_session_id: None,
            captcha_started_at: None,
            captcha_status: None,
            resume_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convert a queue row into a job. Every query that reads `parse_queue`
    /// goes through here before any worker logic sees the data.
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = JobStatus::from_str(&status).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let captcha_status: Option<String> = row.try_get("captcha_status")?;
        let captcha_status = captcha_status
            .map(|s| CaptchaStatus::from_str(&s))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let warnings: Option<Json<Vec<String>>> = row.try_get("warnings")?;

        Ok(Self {
            id: row.try_get("id")?,
            status,
            task_type: row.try_get("task_type")?,
            url: row.try_get("url")?,
            business_id: row.try_get("business_id")?,
            account_id: row.try_get("account_id")?,
            user_id: row.try_get("user_id")?,
            retry_after: row.try_get("retry_after")?,
            error_message: row.try_get("error_message")?,
            warnings: warnings.map(|w| w.0).unwrap_or_default(),
            captcha_required: row.try_get("captcha_required")?,
            captcha_url: row.try_get("captcha_url")?,
            captcha_session_id: row.try_get("captcha_session_id")?,
            captcha_started_at: row.try_get("captcha_started_at")?,
            captcha_status,
            resume_requested: row.try_get("resume_requested")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn kind(&self) -> Result<TaskKind, UnknownTaskKind> {
        self.task_type.parse()
    }

    /// Claim ordering key, or `None` when the job is not claimable at `now`.
    ///
    /// Pending jobs rank before waiting captcha jobs; within a class the
    /// oldest `created_at` wins. Mirrors the `ORDER BY` of the claim query.
    pub fn claim_rank(&self, now: DateTime<Utc>) -> Option<(u8, DateTime<Utc>)> {
        let due = self.retry_after.map_or(true, |at| at <= now);
        match self.status {
            JobStatus::Pending if due => Some((0, self.created_at)),
            JobStatus::Captcha
                if self.captcha_status == Some(CaptchaStatus::Waiting)
                    && (self.resume_requested || (self.retry_after.is_some() && due)) =>
            {
                Some((1, self.created_at))
            }
            _ => None,
        }
    }

    /// True when the job has sat on a captcha longer than `ttl`.
    pub fn captcha_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == JobStatus::Captcha
            && self
                .captcha_started_at
                .is_some_and(|started| now.signed_duration_since(started) > ttl)
    }
}
