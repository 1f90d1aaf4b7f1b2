use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Idle sleep between queue polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock limit for one job's browser and extraction phase
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Age after which a job parked on a captcha is reset to pending
    #[serde(default = "default_captcha_ttl_secs")]
    pub captcha_ttl_secs: u64,

    /// Keep the tab open for a human when a challenge page appears
    #[serde(default = "default_true")]
    pub keep_browser_on_captcha: bool,

    /// Operator-facing base URL for solving parked captchas
    pub captcha_public_base_url: Option<String>,

    /// Root of per-attempt debug bundles; empty disables them
    #[serde(default = "default_debug_bundle_dir")]
    pub debug_bundle_dir: String,

    pub chrome_executable: Option<String>,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// JSON array of `{name, value, domain, path}` cookies
    pub cookies_file: Option<String>,

    pub user_agent: Option<String>,

    #[serde(default = "default_locale")]
    pub browser_locale: String,

    #[serde(default = "default_timezone")]
    pub browser_timezone: String,

    pub geo_latitude: Option<f64>,

    pub geo_longitude: Option<f64>,

    /// Prometheus listener for the worker process
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_captcha_ttl_secs() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

fn default_debug_bundle_dir() -> String {
    "debug_bundles".to_string()
}

fn default_locale() -> String {
    "ru-RU".to_string()
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
