use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::browser::BrowserTab;

/// A browser tab parked on a challenge page, waiting for a human.
pub struct CaptchaSession {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub tab: Box<dyn BrowserTab>,
}

/// Process-local registry of open captcha sessions.
///
/// Sessions are owned here while parked. `take` hands ownership back to the
/// driver on resume; `close` frees a session that will never be resumed.
/// Either way a session leaves the registry exactly once.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, CaptchaSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: String, url: String, tab: Box<dyn BrowserTab>) {
        let session = CaptchaSession {
            id: id.clone(),
            url,
            created_at: Utc::now(),
            tab,
        };
        let replaced = {
            let mut sessions = self.sessions.lock().await;
            let replaced = sessions.insert(id.clone(), session);
            metrics::gauge!("captcha_sessions_open").set(sessions.len() as f64);
            replaced
        };
        tracing::info!(session_id = %id, "Captcha session registered");

        if let Some(mut replaced) = replaced {
            tracing::warn!(session_id = %id, "Replacing existing captcha session");
            replaced.tab.close().await;
        }
    }

    /// Remove a session for reuse by the caller.
    pub async fn take(&self, id: &str) -> Option<CaptchaSession> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(id);
        metrics::gauge!("captcha_sessions_open").set(sessions.len() as f64);
        session
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Close and forget a session. Returns false when it was not registered.
    pub async fn close(&self, id: &str) -> bool {
        let Some(mut session) = self.take(id).await else {
            return false;
        };
        session.tab.close().await;
        tracing::info!(session_id = %id, "Captcha session closed");
        true
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::driver::DriverError;
    use crate::services::extract::CapturedResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTab {
        closes: Arc<AtomicUsize>,
    }

    /// Close does not return until the test releases it.
    struct StuckTab {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl BrowserTab for StuckTab {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn title(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn html(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn reveal_sections(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn captured_responses(&self) -> Vec<CapturedResponse> {
            Vec::new()
        }
        async fn close(&mut self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    #[async_trait]
    impl BrowserTab for CountingTab {
        async fn navigate(&self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn title(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn html(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        async fn reveal_sections(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn captured_responses(&self) -> Vec<CapturedResponse> {
            Vec::new()
        }
        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_close_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = SessionRegistry::new();
        registry
            .register(
                "S1".into(),
                "https://yandex.ru/maps/org/1/".into(),
                Box::new(CountingTab { closes: closes.clone() }),
            )
            .await;

        assert!(registry.contains("S1").await);
        assert!(registry.close("S1").await);
        assert!(!registry.close("S1").await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_take_hands_over_without_closing() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = SessionRegistry::new();
        registry
            .register("S2".into(), "u".into(), Box::new(CountingTab { closes: closes.clone() }))
            .await;

        let session = registry.take("S2").await.unwrap();
        assert_eq!(session.id, "S2");
        assert!(registry.take("S2").await.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replacing_session_does_not_block_registry() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(SessionRegistry::new());
        let stuck = StuckTab {
            entered: entered.clone(),
            release: release.clone(),
        };
        registry.register("S3".into(), "u".into(), Box::new(stuck)).await;

        let replacing = {
            let registry = registry.clone();
            let closes = closes.clone();
            tokio::spawn(async move {
                registry
                    .register("S3".into(), "u".into(), Box::new(CountingTab { closes }))
                    .await;
            })
        };
        entered.notified().await;

        // The old tab is still closing; the new session is already reachable.
        let taken = tokio::time::timeout(std::time::Duration::from_secs(1), registry.take("S3"))
            .await
            .expect("registry locked while replaced tab was closing");
        assert!(taken.is_some());
        assert!(!replacing.is_finished());

        release.notify_one();
        replacing.await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }
}
