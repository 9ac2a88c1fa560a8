use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-wide settings for one crawl invocation.
///
/// Site-specific knobs (selectors, pagination mechanics, per-site delays) live
/// in the YAML catalogue at `sites_path`; this struct only carries values that
/// apply to every site.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub sites_path: PathBuf,
    /// Where the published dataset is written; the previous file at this path
    /// doubles as the change-detection baseline.
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub navigation_timeout_secs: u64,
    pub user_agent: String,
    /// Courtesy delay between consecutive requests, used when a site does not
    /// declare its own `min_request_delay_ms`.
    pub inter_request_delay_ms: u64,
    /// Hard cap on pages per category. Always applied, whatever the site
    /// reports as its page count.
    pub max_pages_per_category: u32,
    /// Fraction (0..=1) of failed categories at which a global retry is attempted.
    pub global_retry_threshold: f64,
    pub max_global_retries: u32,
    /// Run the headless browser inside Chromium's sandbox.
    pub browser_sandbox: bool,
}

impl AppConfig {
    #[must_use]
    pub fn navigation_timeout_ms(&self) -> u64 {
        self.navigation_timeout_secs.saturating_mul(1_000)
    }
}
