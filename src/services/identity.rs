//! Browser identity: cookies and fingerprint settings passed with every parse.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::AppConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Everything the browser needs to look like a returning visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub cookies: Vec<CookieSpec>,
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    pub geolocation: Option<GeoPoint>,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            cookies: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: Viewport::default(),
            locale: "ru-RU".to_string(),
            timezone: "Europe/Moscow".to_string(),
            geolocation: None,
        }
    }
}

/// Builds the identity bundle once per worker from configuration.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    identity: BrowserIdentity,
}

impl IdentityProvider {
    pub fn new(identity: BrowserIdentity) -> Self {
        Self { identity }
    }

    pub async fn from_config(config: &AppConfig) -> Self {
        let cookies = match config.cookies_file.as_deref() {
            Some(path) => load_cookies(Path::new(path)).await,
            None => Vec::new(),
        };
        let geolocation = match (config.geo_latitude, config.geo_longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        };

        tracing::info!(
            cookies = cookies.len(),
            locale = %config.browser_locale,
            timezone = %config.browser_timezone,
            geolocation = geolocation.is_some(),
            "Browser identity loaded"
        );

        Self::new(BrowserIdentity {
            cookies,
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            viewport: Viewport::default(),
            locale: config.browser_locale.clone(),
            timezone: config.browser_timezone.clone(),
            geolocation,
        })
    }

    pub fn identity(&self) -> &BrowserIdentity {
        &self.identity
    }
}

/// Read a cookie JSON array. Missing or malformed files yield no cookies.
pub async fn load_cookies(path: &Path) -> Vec<CookieSpec> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cookie file unreadable, continuing without cookies");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<CookieSpec>>(&raw) {
        Ok(cookies) => cookies,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cookie file malformed, continuing without cookies");
            Vec::new()
        }
    }
}
