//! Headless browser tabs and challenge-page detection.
//!
//! [`BrowserTab`] is the seam the driver works against; [`ChromeTab`] backs it
//! with a chromiumoxide page that records every JSON response it sees.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use scraper::Html;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::driver::DriverError;
use super::extract::{try_all, CapturedResponse};
use super::identity::BrowserIdentity;

/// Title fragments of the anti-bot interstitial.
const CHALLENGE_TITLES: [&str; 3] = ["Вы не робот", "Ой!", "captcha"];

/// Text probes for the "confirm you are not a robot" widget.
const CHALLENGE_TEXT: [&str; 3] = [
    "Подтвердите, что запросы отправляли вы",
    "confirm you are not a robot",
    "Вы не робот",
];

const CHALLENGE_WIDGETS: &str = ".CheckboxCaptcha, .AdvancedCaptcha, .SmartCaptcha, \
     form[action*='checkcaptcha'], iframe[src*='captcha']";

/// How long Chrome gets to exit on its own before it is killed.
const BROWSER_EXIT_GRACE: Duration = Duration::from_secs(10);

/// Scrolls the card and opens the lazy tabs so their XHRs fire.
const REVEAL_SCRIPT: &str = r#"(async () => {
  const pause = (ms) => new Promise((r) => setTimeout(r, ms));
  const scroller = document.querySelector('.scroll__container') || document.scrollingElement;
  for (let i = 0; i < 8; i++) {
    scroller.scrollBy(0, window.innerHeight);
    await pause(400);
  }
  for (const tab of ['prices', 'reviews', 'gallery', 'posts']) {
    const link = document.querySelector(`a[href*="/${tab}/"], [role="tab"][aria-controls*="${tab}"]`);
    if (link) {
      link.click();
      await pause(1200);
      scroller.scrollBy(0, window.innerHeight * 2);
      await pause(400);
    }
  }
  return true;
})()"#;

/// Whether the loaded page is an anti-bot challenge rather than the card.
pub fn is_challenge(final_url: &str, title: &str, html: &str) -> bool {
    if final_url.contains("showcaptcha") || final_url.contains("/checkcaptcha") {
        return true;
    }
    let title_lower = title.to_lowercase();
    if CHALLENGE_TITLES
        .iter()
        .any(|marker| title_lower.contains(&marker.to_lowercase()))
    {
        return true;
    }
    if CHALLENGE_TEXT.iter().any(|marker| html.contains(marker)) {
        return true;
    }
    let doc = Html::parse_document(html);
    !try_all(doc.root_element(), CHALLENGE_WIDGETS).is_empty()
}

/// One open browser tab.
#[async_trait]
pub trait BrowserTab: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    async fn html(&self) -> Result<String, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Scroll and activate tabs so lazily loaded sections render.
    async fn reveal_sections(&self) -> Result<(), DriverError>;

    /// JSON responses observed since the tab opened.
    async fn captured_responses(&self) -> Vec<CapturedResponse>;

    /// Release the tab and its browser. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens tabs configured with a browser identity.
#[async_trait]
pub trait TabLauncher: Send + Sync {
    async fn launch(&self, identity: &BrowserIdentity) -> Result<Box<dyn BrowserTab>, DriverError>;
}

#[derive(Debug, Clone)]
struct SeenResponse {
    request_id: RequestId,
    url: String,
    status: u16,
}

pub struct ChromeTab {
    browser: Option<Browser>,
    page: Page,
    seen: Arc<Mutex<Vec<SeenResponse>>>,
    tasks: Vec<JoinHandle<()>>,
}

#[async_trait]
impl BrowserTab for ChromeTab {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await?;
        // XHRs for the card keep arriving after the load event.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        Ok(())
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn html(&self) -> Result<String, DriverError> {
        Ok(self.page.content().await?)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn reveal_sections(&self) -> Result<(), DriverError> {
        let params = EvaluateParams::builder()
            .expression(REVEAL_SCRIPT)
            .await_promise(true)
            .build()
            .map_err(DriverError::Browser)?;
        self.page.evaluate_expression(params).await?;
        Ok(())
    }

    async fn captured_responses(&self) -> Vec<CapturedResponse> {
        let seen = self.seen.lock().await.clone();
        let mut captured = Vec::with_capacity(seen.len());

        for response in seen {
            let body = match self
                .page
                .execute(GetResponseBodyParams::new(response.request_id.clone()))
                .await
            {
                Ok(body) => body.result,
                Err(e) => {
                    tracing::debug!(url = %response.url, error = %e, "Response body unavailable");
                    continue;
                }
            };
            let text = if body.base64_encoded {
                match BASE64.decode(body.body.as_bytes()) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        tracing::debug!(url = %response.url, error = %e, "Undecodable response body");
                        continue;
                    }
                }
            } else {
                body.body
            };
            match serde_json::from_str(&text) {
                Ok(json) => captured.push(CapturedResponse {
                    url: response.url,
                    status: response.status,
                    body: json,
                }),
                Err(e) => tracing::debug!(url = %response.url, error = %e, "Non-JSON response skipped"),
            }
        }
        captured
    }

    async fn close(&mut self) {
        // The handler task must still be polling for CloseBrowser to reach Chrome.
        if let Some(mut browser) = self.browser.take() {
            match tokio::time::timeout(BROWSER_EXIT_GRACE, browser.close()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Browser close error"),
                Err(_) => tracing::warn!("Browser close timed out"),
            }
            match tokio::time::timeout(BROWSER_EXIT_GRACE, browser.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Browser wait error"),
                Err(_) => {
                    tracing::warn!("Browser still running after close, killing");
                    if let Some(Err(e)) = browser.kill().await {
                        tracing::error!(error = %e, "Failed to kill browser process");
                    }
                }
            }
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Launches one Chrome process per tab so a captcha tab can outlive its job.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
}

impl ChromeLauncher {
    async fn apply_identity(page: &Page, identity: &BrowserIdentity) -> Result<(), DriverError> {
        page.set_user_agent(identity.user_agent.as_str()).await?;
        page.execute(SetTimezoneOverrideParams::new(identity.timezone.clone()))
            .await?;
        page.execute(
            SetLocaleOverrideParams::builder()
                .locale(identity.locale.clone())
                .build(),
        )
        .await?;
        if let Some(geo) = identity.geolocation {
            page.execute(
                SetGeolocationOverrideParams::builder()
                    .latitude(geo.latitude)
                    .longitude(geo.longitude)
                    .accuracy(100.0)
                    .build(),
            )
            .await?;
        }
        if !identity.cookies.is_empty() {
            let cookies = identity
                .cookies
                .iter()
                .map(|c| {
                    CookieParam::builder()
                        .name(c.name.clone())
                        .value(c.value.clone())
                        .domain(c.domain.clone())
                        .path(c.path.clone())
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(DriverError::Browser)?;
            page.set_cookies(cookies).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TabLauncher for ChromeLauncher {
    async fn launch(&self, identity: &BrowserIdentity) -> Result<Box<dyn BrowserTab>, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(identity.viewport.width, identity.viewport.height)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--lang={}", identity.locale));
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DriverError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser.new_page("about:blank").await?;
        Self::apply_identity(&page, identity).await?;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut events = page.event_listener::<EventResponseReceived>().await?;
        let sink = seen.clone();
        let listener_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let mime = event.response.mime_type.to_lowercase();
                if !mime.contains("json") {
                    continue;
                }
                sink.lock().await.push(SeenResponse {
                    request_id: event.request_id.clone(),
                    url: event.response.url.clone(),
                    status: u16::try_from(event.response.status).unwrap_or_default(),
                });
            }
        });

        tracing::debug!(headless = self.headless, "Browser tab launched");

        Ok(Box::new(ChromeTab {
            browser: Some(browser),
            page,
            seen,
            tasks: vec![handler_task, listener_task],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_by_title() {
        assert!(is_challenge("https://yandex.ru/maps/org/1/", "Ой! Вы не робот?", ""));
        assert!(!is_challenge(
            "https://yandex.ru/maps/org/1/",
            "Oliver — Яндекс Карты",
            "<html></html>"
        ));
    }

    #[test]
    fn test_challenge_by_widget_or_url() {
        let html = r#"<html><body><div class="CheckboxCaptcha"><input type="checkbox"></div></body></html>"#;
        assert!(is_challenge("https://yandex.ru/maps/org/1/", "Яндекс", html));
        assert!(is_challenge(
            "https://yandex.ru/showcaptcha?retpath=x",
            "",
            "<html></html>"
        ));
    }

    #[tokio::test]
    #[ignore] // Needs a local Chrome: cargo test -- --ignored
    async fn test_chrome_tab_closes_within_grace() {
        let launcher = ChromeLauncher {
            chrome_executable: None,
            headless: true,
        };
        let mut tab = launcher
            .launch(&BrowserIdentity::default())
            .await
            .expect("launch chrome");
        tab.navigate("about:blank").await.expect("navigate");

        tokio::time::timeout(BROWSER_EXIT_GRACE * 3, tab.close())
            .await
            .expect("close returns once chrome exits");
    }

    #[test]
    fn test_challenge_by_text_probe() {
        let html = "<html><body><p>Подтвердите, что запросы отправляли вы, а не робот</p></body></html>";
        assert!(is_challenge("https://yandex.ru/maps/org/1/", "Яндекс", html));
    }
}
