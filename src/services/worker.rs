//! Queue worker: one tick claims at most one job and drives it to a
//! terminal or parked state.
//!
//! ```text
//! pending ──claim──▶ processing ──card ok──▶ completed
//!    ▲                  │  │ └────fail─────▶ error
//!    │   session lost   │  └──challenge──▶ captcha (waiting)
//!    └──────────────────┘                      │ resume / retry_after due
//!    ▲                                         ▼
//!    └──────── ttl expired ─────────── claim again as processing
//! ```

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::debug_bundle::{DebugBundle, DebugBundles};
use super::driver::{CardDriver, DriverError, DriverOutcome, ParseRequest};
use super::gateway::{CardWrite, PersistError, PersistenceGateway};
use super::identity::BrowserIdentity;
use super::queue::{JobStore, QueueError};
use super::sessions::SessionRegistry;
use super::urls;
use super::validation::{self, DataSource};
use crate::config::AppConfig;
use crate::models::card::NormalizedCard;
use crate::models::job::{JobStatus, ParseJob, TaskKind};
use crate::models::validation::ValidationResult;

/// Task types this worker claims. `sync_*` jobs belong to other consumers.
pub const HANDLED_TASK_TYPES: [&str; 2] = [TaskKind::PARSE_CARD, TaskKind::CABINET_FALLBACK];

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub job_timeout: Duration,
    pub captcha_ttl: chrono::Duration,
    /// Delay before a parked captcha job becomes claimable without a resume.
    pub captcha_retry_after: chrono::Duration,
    pub keep_browser_on_captcha: bool,
    /// Upper bound on closing an expired captcha tab during the sweep.
    pub session_close_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(600),
            captcha_ttl: chrono::Duration::minutes(30),
            captcha_retry_after: chrono::Duration::minutes(30),
            keep_browser_on_captcha: true,
            session_close_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            captcha_ttl: chrono::Duration::seconds(
                i64::try_from(config.captcha_ttl_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            keep_browser_on_captcha: config.keep_browser_on_captcha,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing eligible.
    Idle,
    /// Captcha jobs reset by the TTL sweep; nothing was claimed.
    Expired(usize),
    Processed { job_id: Uuid, status: JobStatus },
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    driver: Arc<dyn CardDriver>,
    gateway: Arc<dyn PersistenceGateway>,
    sessions: Arc<SessionRegistry>,
    bundles: DebugBundles,
    identity: BrowserIdentity,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        driver: Arc<dyn CardDriver>,
        gateway: Arc<dyn PersistenceGateway>,
        sessions: Arc<SessionRegistry>,
        bundles: DebugBundles,
        identity: BrowserIdentity,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            driver,
            gateway,
            sessions,
            bundles,
            identity,
            settings,
        }
    }

    /// Run one poll: expire stale captcha jobs, else claim and process one job.
    pub async fn tick(&self) -> Result<TickOutcome, QueueError> {
        let now = Utc::now();

        let expired = self.expire_captchas(now).await?;
        if expired > 0 {
            return Ok(TickOutcome::Expired(expired));
        }

        let Some(job) = self.store.claim_next(now, &HANDLED_TASK_TYPES).await? else {
            return Ok(TickOutcome::Idle);
        };
        metrics::counter!("parse_jobs_claimed_total").increment(1);

        let job_id = job.id;
        let started = Instant::now();
        let status = self.process(job).await?;
        metrics::histogram!("parse_job_duration_seconds").record(started.elapsed().as_secs_f64());

        Ok(TickOutcome::Processed { job_id, status })
    }

    async fn expire_captchas(&self, now: chrono::DateTime<Utc>) -> Result<usize, QueueError> {
        let stale = self
            .store
            .expired_captcha_jobs(now - self.settings.captcha_ttl)
            .await?;

        let mut expired = 0;
        for job in stale {
            if let Some(session_id) = job.captcha_session_id.as_deref() {
                let close = self.sessions.close(session_id);
                if tokio::time::timeout(self.settings.session_close_timeout, close).await.is_err() {
                    tracing::warn!(job_id = %job.id, session_id, "Captcha session close timed out, tab dropped");
                }
            }
            let note = format!("captcha_expired:ttl={}s", self.settings.captcha_ttl.num_seconds());
            if self.store.expire_captcha(job.id, &note).await? {
                expired += 1;
                metrics::counter!("captcha_sessions_expired_total").increment(1);
                tracing::info!(job_id = %job.id, session_id = ?job.captcha_session_id, "Captcha job expired to pending");
            }
        }
        Ok(expired)
    }

    async fn process(&self, job: ParseJob) -> Result<JobStatus, QueueError> {
        let job_id = job.id;
        tracing::info!(job_id = %job_id, task_type = %job.task_type, resume = job.captcha_session_id.is_some(), "Processing parse job");

        let source = match job.kind() {
            Ok(TaskKind::CabinetFallback) => DataSource::YandexBusiness,
            Ok(TaskKind::ParseCard) => DataSource::YandexMaps,
            Ok(TaskKind::Sync(_)) | Err(_) => {
                return self
                    .fail(job_id, &format!("unsupported_task_type:{}", job.task_type), None)
                    .await;
            }
        };

        let Some(business_id) = job.business_id.clone().filter(|b| !b.trim().is_empty()) else {
            return self.fail(job_id, "missing_business_id", None).await;
        };

        let raw_url = match job.url.clone().filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None if source == DataSource::YandexBusiness => {
                match self.gateway.resolve_map_url(&business_id).await {
                    Ok(Some(url)) => url,
                    Ok(None) => return self.fail(job_id, "missing_url", None).await,
                    Err(e) => return self.fail(job_id, &format!("resolve_failed:{e}"), None).await,
                }
            }
            None => return self.fail(job_id, "missing_url", None).await,
        };
        let url = urls::normalize_map_url(&raw_url);

        let bundle = self.bundles.open();
        let request = ParseRequest {
            url: url.clone(),
            keep_open_on_captcha: self.settings.keep_browser_on_captcha,
            session_id: job.captcha_session_id.clone(),
            identity: self.identity.clone(),
            bundle: bundle.clone(),
        };

        let outcome = match self.run_guarded(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, DriverError::SyncInAsyncLoop(_) | DriverError::Panic(_)) {
                    bundle.write_exception(&format!("{e:?}")).await;
                }
                return self.fail(job_id, &e.tag(), Some(&bundle)).await;
            }
        };

        match outcome {
            DriverOutcome::CaptchaDetected { session_id, captcha_url } => {
                let retry_after = Utc::now() + self.settings.captcha_retry_after;
                self.guarded(
                    job_id,
                    self.store
                        .mark_captcha(job_id, session_id.as_deref(), &captcha_url, retry_after)
                        .await?,
                );
                metrics::counter!("parse_jobs_captcha_total").increment(1);
                tracing::info!(job_id = %job_id, session_id = ?session_id, captcha_url = %captcha_url, "Job parked on captcha");
                Ok(JobStatus::Captcha)
            }
            DriverOutcome::CaptchaSessionLost => {
                self.guarded(job_id, self.store.reset_to_pending(job_id, "captcha_session_lost").await?);
                tracing::warn!(job_id = %job_id, "Captcha session lost, job reset to pending");
                Ok(JobStatus::Pending)
            }
            DriverOutcome::NoData => self.fail(job_id, "parser_returned_none", Some(&bundle)).await,
            DriverOutcome::Card(card) => {
                self.finish(&job, &business_id, &url, source, &card, &bundle)
                    .await
            }
        }
    }

    /// Validate, persist and complete a job that produced a card.
    async fn finish(
        &self,
        job: &ParseJob,
        business_id: &str,
        url: &str,
        source: DataSource,
        card: &NormalizedCard,
        bundle: &DebugBundle,
    ) -> Result<JobStatus, QueueError> {
        let verdict = validation::validate(card, source);
        let warnings = if verdict.is_successful {
            validation::completion_warnings(card, &verdict)
        } else {
            Vec::new()
        };
        bundle
            .write_validation(&serde_json::json!({
                "verdict": &verdict,
                "warnings": &warnings,
            }))
            .await;

        if !verdict.is_successful {
            return self.fail(job.id, &verdict.reason, Some(bundle)).await;
        }

        if let Err(e) = self.persist(business_id, job.user_id.as_deref(), url, card, &verdict).await {
            return self.fail(job.id, &format!("save_failed:{e}"), Some(bundle)).await;
        }

        self.guarded(job.id, self.store.mark_completed(job.id, &warnings).await?);
        metrics::counter!("parse_jobs_completed_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            business_id,
            quality_score = verdict.quality_score,
            warnings = warnings.len(),
            "Parse job completed"
        );
        Ok(JobStatus::Completed)
    }

    async fn persist(
        &self,
        business_id: &str,
        owner_id: Option<&str>,
        url: &str,
        card: &NormalizedCard,
        verdict: &ValidationResult,
    ) -> Result<(), PersistError> {
        let write = CardWrite::from_card(
            business_id,
            owner_id,
            url,
            card,
            verdict.quality_score,
            Utc::now().date_naive(),
        );
        self.gateway.persist_card(write).await
    }

    /// Run the driver on its own task under the wall-clock guard.
    async fn run_guarded(&self, request: ParseRequest) -> Result<DriverOutcome, DriverError> {
        let driver = self.driver.clone();
        let handle = tokio::spawn(async move { driver.parse(request).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.settings.job_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(DriverError::from_panic(join_err.into_panic().as_ref()))
            }
            Ok(Err(_)) => Err(DriverError::Panic("driver task cancelled".to_string())),
            Err(_) => {
                abort.abort();
                Err(DriverError::Timeout(self.settings.job_timeout.as_secs()))
            }
        }
    }

    async fn fail(
        &self,
        job_id: Uuid,
        reason: &str,
        bundle: Option<&DebugBundle>,
    ) -> Result<JobStatus, QueueError> {
        let message = match bundle.and_then(DebugBundle::path) {
            Some(path) => format!("{reason} bundle={}", path.display()),
            None => reason.to_string(),
        };
        metrics::counter!("parse_jobs_failed_total", "reason" => reason_label(reason)).increment(1);
        tracing::error!(job_id = %job_id, reason, "Parse job failed");

        self.guarded(job_id, self.store.mark_error(job_id, &message).await?);
        Ok(JobStatus::Error)
    }

    fn guarded(&self, job_id: Uuid, applied: bool) {
        if !applied {
            tracing::warn!(job_id = %job_id, "Job left processing concurrently, transition skipped");
        }
    }
}

/// Low-cardinality metric label: the tag before the first `:`.
fn reason_label(reason: &str) -> String {
    reason.split(':').next().unwrap_or(reason).to_string()
}
