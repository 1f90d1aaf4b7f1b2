//! In-memory stand-ins for the queue table, the database gateway and the
//! browser, plus a harness wiring them into a real `Worker`.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use salon_card_parser::models::job::{CaptchaStatus, JobStatus, ParseJob, TaskKind};
use salon_card_parser::models::snapshot::{
    CardSnapshot, LegacyMetrics, PostRow, ReviewRow, ServiceRow, StatsRow,
};
use salon_card_parser::services::browser::{BrowserTab, TabLauncher};
use salon_card_parser::services::debug_bundle::DebugBundles;
use salon_card_parser::services::driver::{BrowserDriver, DriverError};
use salon_card_parser::services::extract::CapturedResponse;
use salon_card_parser::services::gateway::{CardWrite, PersistError, PersistenceGateway};
use salon_card_parser::services::identity::BrowserIdentity;
use salon_card_parser::services::queue::{JobStore, QueueError, ResumeRequest};
use salon_card_parser::services::reconcile::Reconciler;
use salon_card_parser::services::sessions::SessionRegistry;
use salon_card_parser::services::worker::{Worker, WorkerSettings};

/// Where a blocked navigation lands.
pub const CAPTCHA_URL: &str =
    "https://yandex.ru/showcaptcha?cc=1&retpath=https%3A%2F%2Fyandex.ru%2Fmaps%2Forg%2F203293742306%2F";

/// Operator base URL handed to the driver.
pub const CAPTCHA_BASE_URL: &str = "https://ops.salon.test";

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

fn append_note(existing: Option<String>, note: &str) -> Option<String> {
    match existing.filter(|m| !m.is_empty()) {
        Some(message) => Some(format!("{message}; {note}")),
        None => Some(note.to_string()),
    }
}

fn clear_captcha(job: &mut ParseJob) {
    job.captcha_required = false;
    job.captcha_url = None;
    job.captcha_session_id = None;
    job.captcha_started_at = None;
    job.resume_requested = false;
}

/// `parse_queue` in a map, with the same guards as the SQL store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, ParseJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edit a stored job in place, e.g. to backdate a timestamp.
    pub fn edit(&self, id: Uuid, f: impl FnOnce(&mut ParseJob)) {
        let mut jobs = self.jobs.lock().unwrap();
        f(jobs.get_mut(&id).expect("job exists"));
    }

    pub fn snapshot(&self, id: Uuid) -> ParseJob {
        self.jobs.lock().unwrap().get(&id).cloned().expect("job exists")
    }

    fn transition(&self, id: Uuid, from: JobStatus, f: impl FnOnce(&mut ParseJob)) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                f(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &ParseJob) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ParseJob>, QueueError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        task_types: &[&str],
    ) -> Result<Option<ParseJob>, QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .values()
            .filter(|job| task_types.contains(&job.task_type.as_str()))
            .filter_map(|job| job.claim_rank(now).map(|rank| (rank, job.id)))
            .min()
            .map(|(_, id)| id);

        Ok(next.and_then(|id| {
            let job = jobs.get_mut(&id)?;
            job.status = JobStatus::Processing;
            job.updated_at = Utc::now();
            Some(job.clone())
        }))
    }

    async fn expired_captcha_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParseJob>, QueueError> {
        let jobs = self.jobs.lock().unwrap();
        let mut stale: Vec<ParseJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Captcha)
            .filter(|job| job.captcha_started_at.is_some_and(|started| started < cutoff))
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.captcha_started_at);
        Ok(stale)
    }

    async fn expire_captcha(&self, id: Uuid, note: &str) -> Result<bool, QueueError> {
        Ok(self.transition(id, JobStatus::Captcha, |job| {
            job.status = JobStatus::Pending;
            job.captcha_status = Some(CaptchaStatus::Expired);
            clear_captcha(job);
            job.retry_after = None;
            job.error_message = append_note(job.error_message.take(), note);
        }))
    }

    async fn mark_captcha(
        &self,
        id: Uuid,
        session_id: Option<&str>,
        captcha_url: &str,
        retry_after: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.status = JobStatus::Captcha;
            job.captcha_status = Some(CaptchaStatus::Waiting);
            job.captcha_required = true;
            job.captcha_session_id = session_id.map(str::to_string);
            job.captcha_url = Some(captcha_url.to_string());
            job.captcha_started_at = job.captcha_started_at.or(Some(Utc::now()));
            job.resume_requested = false;
            job.retry_after = Some(retry_after);
        }))
    }

    async fn reset_to_pending(&self, id: Uuid, note: &str) -> Result<bool, QueueError> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.status = JobStatus::Pending;
            job.captcha_status = None;
            clear_captcha(job);
            job.retry_after = None;
            job.error_message = append_note(job.error_message.take(), note);
        }))
    }

    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> Result<bool, QueueError> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.status = JobStatus::Completed;
            job.error_message = None;
            job.warnings = warnings.to_vec();
            job.captcha_status = None;
            clear_captcha(job);
        }))
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> Result<bool, QueueError> {
        Ok(self.transition(id, JobStatus::Processing, |job| {
            job.status = JobStatus::Error;
            job.error_message = Some(message.to_string());
            job.captcha_status = None;
            job.captcha_required = false;
            job.captcha_session_id = None;
            job.captcha_started_at = None;
            job.resume_requested = false;
        }))
    }

    async fn request_resume(&self, id: Uuid) -> Result<ResumeRequest, QueueError> {
        let mut jobs = self.jobs.lock().unwrap();
        Ok(match jobs.get_mut(&id) {
            None => ResumeRequest::NotFound,
            Some(job) if job.status == JobStatus::Captcha => {
                job.resume_requested = true;
                ResumeRequest::Accepted
            }
            Some(_) => ResumeRequest::NotWaiting,
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Records every gateway call and keeps rows the way the tables would.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<&'static str>>,
    pub snapshots: Mutex<Vec<(String, CardSnapshot)>>,
    pub reviews: Mutex<HashMap<String, ReviewRow>>,
    pub services: Mutex<HashMap<String, Vec<ServiceRow>>>,
    pub stats: Mutex<HashMap<String, StatsRow>>,
    pub legacy: Mutex<HashMap<String, LegacyMetrics>>,
    pub map_urls: Mutex<HashMap<String, String>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named call fail from now on.
    pub fn fail_on(&self, call: &'static str) {
        *self.fail_on.lock().unwrap() = Some(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn latest_snapshot(&self, business_id: &str) -> Option<CardSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == business_id)
            .map(|(_, s)| s.clone())
    }

    fn record(&self, call: &'static str) -> Result<(), PersistError> {
        self.calls.lock().unwrap().push(call);
        if *self.fail_on.lock().unwrap() == Some(call) {
            return Err(PersistError::Rejected(format!("{call} unavailable")));
        }
        Ok(())
    }
}

fn push_snapshot(
    snapshots: &mut Vec<(String, CardSnapshot)>,
    business_id: &str,
    mut snapshot: CardSnapshot,
) {
    if let Some((_, prior)) = snapshots.iter().rev().find(|(id, _)| id == business_id) {
        snapshot.inherit_rich_fields(prior);
    }
    snapshots.push((business_id.to_string(), snapshot));
}

/// Mirrors the `COALESCE` on reply and rating in the review upsert.
fn merge_reviews(reviews: &mut HashMap<String, ReviewRow>, rows: &[ReviewRow]) {
    for row in rows {
        let mut row = row.clone();
        if let Some(existing) = reviews.get(&row.id) {
            row.response_text = row.response_text.or_else(|| existing.response_text.clone());
            row.rating = row.rating.or(existing.rating);
        }
        reviews.insert(row.id.clone(), row);
    }
}

fn merge_stats(stats: &mut HashMap<String, StatsRow>, rows: &[StatsRow]) {
    for row in rows {
        stats.insert(row.id.clone(), row.clone());
    }
}

#[async_trait]
impl PersistenceGateway for RecordingGateway {
    async fn save_new_card_version(
        &self,
        business_id: &str,
        snapshot: CardSnapshot,
    ) -> Result<(), PersistError> {
        self.record("save_new_card_version")?;
        push_snapshot(&mut self.snapshots.lock().unwrap(), business_id, snapshot);
        Ok(())
    }

    async fn upsert_reviews(&self, rows: &[ReviewRow]) -> Result<(), PersistError> {
        self.record("upsert_reviews")?;
        merge_reviews(&mut self.reviews.lock().unwrap(), rows);
        Ok(())
    }

    async fn upsert_posts(&self, _rows: &[PostRow]) -> Result<(), PersistError> {
        self.record("upsert_posts")
    }

    async fn upsert_stats(&self, rows: &[StatsRow]) -> Result<(), PersistError> {
        self.record("upsert_stats")?;
        merge_stats(&mut self.stats.lock().unwrap(), rows);
        Ok(())
    }

    async fn upsert_parsed_services(
        &self,
        business_id: &str,
        _owner_id: Option<&str>,
        rows: &[ServiceRow],
    ) -> Result<usize, PersistError> {
        self.record("upsert_parsed_services")?;
        self.services
            .lock()
            .unwrap()
            .insert(business_id.to_string(), rows.to_vec());
        Ok(rows.len())
    }

    async fn write_legacy_metrics(
        &self,
        business_id: &str,
        metrics: &LegacyMetrics,
    ) -> Result<(), PersistError> {
        self.record("write_legacy_metrics")?;
        self.legacy
            .lock()
            .unwrap()
            .insert(business_id.to_string(), metrics.clone());
        Ok(())
    }

    /// Steps are recorded by name and staged on copies; an error drops the
    /// copies, like a rolled-back transaction.
    async fn persist_card(&self, write: CardWrite) -> Result<(), PersistError> {
        let business_id = write.business_id.as_str();
        let mut snapshots = self.snapshots.lock().unwrap().clone();
        let mut services = self.services.lock().unwrap().clone();
        let mut reviews = self.reviews.lock().unwrap().clone();
        let mut stats = self.stats.lock().unwrap().clone();
        let mut legacy = self.legacy.lock().unwrap().clone();

        self.record("save_new_card_version")?;
        push_snapshot(&mut snapshots, business_id, write.snapshot);
        if let Some(rows) = write.services {
            self.record("upsert_parsed_services")?;
            services.insert(business_id.to_string(), rows);
        }
        if !write.reviews.is_empty() {
            self.record("upsert_reviews")?;
            merge_reviews(&mut reviews, &write.reviews);
        }
        if !write.posts.is_empty() {
            self.record("upsert_posts")?;
        }
        self.record("upsert_stats")?;
        merge_stats(&mut stats, &write.stats);
        self.record("write_legacy_metrics")?;
        legacy.insert(business_id.to_string(), write.legacy);

        *self.snapshots.lock().unwrap() = snapshots;
        *self.services.lock().unwrap() = services;
        *self.reviews.lock().unwrap() = reviews;
        *self.stats.lock().unwrap() = stats;
        *self.legacy.lock().unwrap() = legacy;
        Ok(())
    }

    async fn resolve_map_url(&self, business_id: &str) -> Result<Option<String>, PersistError> {
        self.record("resolve_map_url")?;
        Ok(self.map_urls.lock().unwrap().get(business_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// What the scripted tab shows. Shared by every tab the launcher opens, so a
/// test can "solve" a challenge by swapping the page under a parked tab.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    /// Navigation lands on `CAPTCHA_URL` instead of the requested page.
    pub blocked: bool,
    pub current_url: String,
    pub title: String,
    pub html: String,
    pub responses: Vec<CapturedResponse>,
    pub navigate_delay: Option<Duration>,
    pub panic_with: Option<&'static str>,
    /// Close never returns, like a browser process that ignores shutdown.
    pub hang_on_close: bool,
}

#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    script: Arc<Mutex<PageScript>>,
    launches: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedBrowser {
    pub fn serving(page: PageScript) -> Self {
        let browser = Self::default();
        browser.show(page);
        browser
    }

    /// Replace what every open tab shows.
    pub fn show(&self, page: PageScript) {
        *self.script.lock().unwrap() = page;
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTab {
    script: Arc<Mutex<PageScript>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedTab {
    fn read<T>(&self, f: impl FnOnce(&PageScript) -> T) -> T {
        f(&self.script.lock().unwrap())
    }
}

#[async_trait]
impl BrowserTab for ScriptedTab {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let (delay, panic_with) = self.read(|s| (s.navigate_delay, s.panic_with));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = panic_with {
            panic!("{message}");
        }
        let mut script = self.script.lock().unwrap();
        script.current_url = if script.blocked {
            CAPTCHA_URL.to_string()
        } else {
            url.to_string()
        };
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.read(|s| s.title.clone()))
    }

    async fn html(&self) -> Result<String, DriverError> {
        Ok(self.read(|s| s.html.clone()))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.read(|s| s.current_url.clone()))
    }

    async fn reveal_sections(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn captured_responses(&self) -> Vec<CapturedResponse> {
        self.read(|s| s.responses.clone())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.read(|s| s.hang_on_close) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl TabLauncher for ScriptedBrowser {
    async fn launch(&self, _identity: &BrowserIdentity) -> Result<Box<dyn BrowserTab>, DriverError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedTab {
            script: self.script.clone(),
            closes: self.closes.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A real `Worker` over the in-memory store, gateway and scripted browser.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub gateway: Arc<RecordingGateway>,
    pub browser: ScriptedBrowser,
    pub sessions: Arc<SessionRegistry>,
    pub worker: Worker,
}

impl Harness {
    pub fn new(page: PageScript) -> Self {
        Self::with_settings(page, WorkerSettings::default())
    }

    pub fn with_settings(page: PageScript, settings: WorkerSettings) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let browser = ScriptedBrowser::serving(page);
        let sessions = Arc::new(SessionRegistry::new());

        let driver = BrowserDriver::new(
            Arc::new(browser.clone()),
            sessions.clone(),
            Arc::new(Reconciler::default()),
            Some(CAPTCHA_BASE_URL.to_string()),
        );
        let worker = Worker::new(
            store.clone(),
            Arc::new(driver),
            gateway.clone(),
            sessions.clone(),
            DebugBundles::disabled(),
            BrowserIdentity::default(),
            settings,
        );

        Self {
            store,
            gateway,
            browser,
            sessions,
            worker,
        }
    }

    /// Queue a parse_card job for `business_id`.
    pub async fn enqueue(&self, url: &str, business_id: &str) -> Uuid {
        self.enqueue_kind(TaskKind::PARSE_CARD, Some(url), Some(business_id)).await
    }

    pub async fn enqueue_kind(
        &self,
        task_type: &str,
        url: Option<&str>,
        business_id: Option<&str>,
    ) -> Uuid {
        let job = ParseJob::pending(
            task_type,
            url.map(str::to_string),
            business_id.map(str::to_string),
        );
        self.store.insert(&job).await.expect("insert job");
        job.id
    }

    pub fn job(&self, id: Uuid) -> ParseJob {
        self.store.snapshot(id)
    }
}
