//! Captcha-aware card driver.
//!
//! Opens (or resumes) a browser tab, reveals the lazy card sections, hands
//! the captured page to the [`Reconciler`] and reports one of four outcomes.
//! A tab that hits a challenge is parked in the [`SessionRegistry`] for a
//! human to solve when the caller asks for it.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::browser::{is_challenge, BrowserTab, TabLauncher};
use super::debug_bundle::DebugBundle;
use super::extract::PageCapture;
use super::identity::BrowserIdentity;
use super::reconcile::Reconciler;
use super::sessions::SessionRegistry;
use super::urls;
use crate::models::card::NormalizedCard;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser error: {0}")]
    Browser(String),

    #[error("blocking browser call inside the async runtime: {0}")]
    SyncInAsyncLoop(String),

    #[error("driver panicked: {0}")]
    Panic(String),

    #[error("parse timed out after {0}s")]
    Timeout(u64),
}

impl DriverError {
    /// Reason tag recorded on the failed job.
    pub fn tag(&self) -> String {
        match self {
            DriverError::Browser(e) => format!("browser_error:{e}"),
            DriverError::SyncInAsyncLoop(_) => "playwright_sync_in_async_loop".to_string(),
            DriverError::Panic(msg) => format!("unhandled_panic:{msg}"),
            DriverError::Timeout(secs) => format!("parse_timeout:{secs}s"),
        }
    }

    /// Classify a panic caught at the task boundary.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());

        // tokio's wording for blocking calls made on a runtime thread.
        if msg.contains("from within a runtime")
            || msg.contains("blocking is not allowed")
            || msg.contains("Cannot block the current thread")
        {
            DriverError::SyncInAsyncLoop(msg)
        } else {
            DriverError::Panic(msg)
        }
    }
}

impl From<chromiumoxide::error::CdpError> for DriverError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        DriverError::Browser(e.to_string())
    }
}

pub struct ParseRequest {
    pub url: String,
    pub keep_open_on_captcha: bool,
    /// Resume a parked captcha session instead of opening a new tab.
    pub session_id: Option<String>,
    pub identity: BrowserIdentity,
    pub bundle: DebugBundle,
}

#[derive(Debug)]
pub enum DriverOutcome {
    Card(Box<NormalizedCard>),
    CaptchaDetected {
        /// `None` when the tab was not kept open.
        session_id: Option<String>,
        captcha_url: String,
    },
    /// The session to resume is no longer registered.
    CaptchaSessionLost,
    /// No strategy produced anything.
    NoData,
}

impl DriverOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            DriverOutcome::Card(_) => "card",
            DriverOutcome::CaptchaDetected { .. } => "captcha_detected",
            DriverOutcome::CaptchaSessionLost => "captcha_session_lost",
            DriverOutcome::NoData => "parser_returned_none",
        }
    }
}

#[async_trait]
pub trait CardDriver: Send + Sync {
    async fn parse(&self, request: ParseRequest) -> Result<DriverOutcome, DriverError>;
}

enum Visit {
    Blocked { current_url: String },
    Captured(PageCapture),
}

pub struct BrowserDriver {
    launcher: Arc<dyn TabLauncher>,
    sessions: Arc<SessionRegistry>,
    reconciler: Arc<Reconciler>,
    captcha_public_base_url: Option<String>,
}

impl BrowserDriver {
    pub fn new(
        launcher: Arc<dyn TabLauncher>,
        sessions: Arc<SessionRegistry>,
        reconciler: Arc<Reconciler>,
        captcha_public_base_url: Option<String>,
    ) -> Self {
        Self {
            launcher,
            sessions,
            reconciler,
            captcha_public_base_url,
        }
    }

    fn public_captcha_url(&self, session_id: &str, page_url: &str) -> String {
        match self.captcha_public_base_url.as_deref() {
            Some(base) => format!("{}/captcha/{}", base.trim_end_matches('/'), session_id),
            None => page_url.to_string(),
        }
    }

    async fn visit(
        &self,
        tab: &dyn BrowserTab,
        request: &ParseRequest,
        resumed: bool,
    ) -> Result<Visit, DriverError> {
        let expected_org = urls::org_id(&request.url);

        if !resumed {
            tab.navigate(&request.url).await?;
        }
        let mut current_url = tab.current_url().await?;
        if is_challenge(&current_url, &tab.title().await?, &tab.html().await?) {
            return Ok(Visit::Blocked { current_url });
        }

        // A solved challenge may leave the tab somewhere other than the card.
        if resumed && expected_org.is_some() && urls::org_id(&current_url) != expected_org {
            tracing::info!(url = %request.url, current = %current_url, "Re-navigating after solved challenge");
            tab.navigate(&request.url).await?;
            current_url = tab.current_url().await?;
            if is_challenge(&current_url, &tab.title().await?, &tab.html().await?) {
                return Ok(Visit::Blocked { current_url });
            }
        }

        if let Err(e) = tab.reveal_sections().await {
            tracing::debug!(url = %request.url, error = %e, "Section reveal failed, extracting what loaded");
        }

        let html = tab.html().await?;
        let final_url = tab.current_url().await?;
        if expected_org.is_some() && urls::org_id(&final_url) != expected_org {
            tracing::warn!(url = %request.url, final_url = %final_url, bundle = %request.bundle.id(), "Page redirected away from the card");
            request.bundle.write_redirect_snapshot(&html).await;
        }

        let responses = tab.captured_responses().await;
        request.bundle.write_responses(&responses).await;

        Ok(Visit::Captured(PageCapture {
            requested_url: request.url.clone(),
            final_url,
            org_id: expected_org,
            title: tab.title().await?,
            html,
            responses,
        }))
    }
}

#[async_trait]
impl CardDriver for BrowserDriver {
    async fn parse(&self, request: ParseRequest) -> Result<DriverOutcome, DriverError> {
        let (mut tab, resumed) = match request.session_id.as_deref() {
            Some(id) => match self.sessions.take(id).await {
                Some(session) => {
                    tracing::info!(session_id = %id, "Resuming captcha session");
                    (session.tab, true)
                }
                None => {
                    tracing::warn!(session_id = %id, "Captcha session not registered");
                    return Ok(DriverOutcome::CaptchaSessionLost);
                }
            },
            None => (self.launcher.launch(&request.identity).await?, false),
        };

        let visit = match self.visit(tab.as_ref(), &request, resumed).await {
            Ok(visit) => visit,
            Err(e) => {
                tab.close().await;
                return Err(e);
            }
        };

        match visit {
            Visit::Blocked { current_url } => {
                if !request.keep_open_on_captcha {
                    tab.close().await;
                    return Ok(DriverOutcome::CaptchaDetected {
                        session_id: None,
                        captcha_url: current_url,
                    });
                }
                let session_id = request
                    .session_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let captcha_url = self.public_captcha_url(&session_id, &current_url);
                self.sessions
                    .register(session_id.clone(), request.url.clone(), tab)
                    .await;
                Ok(DriverOutcome::CaptchaDetected {
                    session_id: Some(session_id),
                    captcha_url,
                })
            }
            Visit::Captured(page) => {
                tab.close().await;
                let card = self.reconciler.reconcile(&page);
                if card.is_empty() && card.upstream_error.is_none() {
                    Ok(DriverOutcome::NoData)
                } else {
                    Ok(DriverOutcome::Card(Box::new(card)))
                }
            }
        }
    }
}
