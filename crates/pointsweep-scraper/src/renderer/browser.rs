//! Headless Chromium renderer over `headless_chrome`, for sites that paginate
//! through in-page callbacks or scroll-triggered loading.
//!
//! `headless_chrome` is a blocking API, so every browser call runs on tokio's
//! blocking pool. One renderer owns one browser process and one tab.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use super::http::looks_like_bot_challenge;
use super::{Navigation, PageRenderer, RendererFactory};
use crate::error::{classify_message, ErrorKind, ScraperError};

/// Status of the document the tab last navigated to, or 0 where the browser
/// does not expose it.
const NAVIGATION_STATUS: &str =
    "(() => { const nav = performance.getEntriesByType('navigation')[0]; return nav && nav.responseStatus ? nav.responseStatus : 0; })()";

/// Pauses between categories and session breaks can run for minutes; the
/// browser must not treat them as an idle connection.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct BrowserRendererFactory {
    user_agent: String,
    sandbox: bool,
}

impl BrowserRendererFactory {
    #[must_use]
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_owned(),
            sandbox: true,
        }
    }

    /// Containers usually cannot run Chromium's sandbox.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }
}

#[async_trait]
impl RendererFactory for BrowserRendererFactory {
    async fn launch(&self) -> Result<Box<dyn PageRenderer>, ScraperError> {
        let user_agent = self.user_agent.clone();
        let sandbox = self.sandbox;
        let (browser, tab) = blocking(move || {
            let browser = Browser::new(LaunchOptions {
                headless: true,
                sandbox,
                idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
                ..Default::default()
            })?;
            let tab = browser.new_tab()?;
            tab.set_user_agent(&user_agent, Some("ja-JP,ja"), None)?;
            Ok::<_, anyhow::Error>((browser, tab))
        })
        .await
        .map_err(|reason| ScraperError::Renderer(format!("failed to launch browser: {reason}")))?;

        tracing::info!(sandbox, "headless browser launched");
        Ok(Box::new(BrowserRenderer {
            browser: Some(browser),
            tab,
        }))
    }
}

pub struct BrowserRenderer {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<Navigation, ScraperError> {
        let tab = Arc::clone(&self.tab);
        let target = url.to_owned();
        let (status, final_url, body) = blocking(move || {
            tab.set_default_timeout(Duration::from_millis(timeout_ms));
            tab.navigate_to(&target)?;
            tab.wait_until_navigated()?;
            let status = tab.evaluate(NAVIGATION_STATUS, false)?.value;
            let body = tab.get_content()?;
            Ok::<_, anyhow::Error>((status, tab.get_url(), body))
        })
        .await
        .map_err(|reason| navigation_error(url, timeout_ms, reason))?;

        if looks_like_bot_challenge(&body) {
            return Err(ScraperError::BotChallenge {
                url: url.to_owned(),
            });
        }

        let status = document_status(status.as_ref());
        tracing::debug!(url, status, bytes = body.len(), "page rendered");
        Ok(Navigation { status, final_url })
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, ScraperError> {
        let tab = Arc::clone(&self.tab);
        let script = script.to_owned();
        blocking(move || {
            tab.evaluate(&script, true)
                .map(|object| object.value.unwrap_or(serde_json::Value::Null))
        })
        .await
        .map_err(|reason| ScraperError::Script { reason })
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        let tab = Arc::clone(&self.tab);
        blocking(move || tab.get_content())
            .await
            .map_err(ScraperError::Renderer)
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        let tab = Arc::clone(&self.tab);
        let browser = self.browser.take();
        blocking(move || {
            let closed = tab.close(true).map(|_| ());
            // Dropping the last handle terminates the browser process.
            drop(browser);
            closed
        })
        .await
        .map_err(ScraperError::Renderer)
    }
}

async fn blocking<T, E, F>(op: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display,
{
    match tokio::task::spawn_blocking(move || op().map_err(|e| e.to_string())).await {
        Ok(result) => result,
        Err(join) => Err(format!("browser task failed: {join}")),
    }
}

/// `headless_chrome` reports an expired wait as "the event waited for never
/// came"; that and anything mentioning a timeout is a navigation timeout.
fn navigation_error(url: &str, timeout_ms: u64, reason: String) -> ScraperError {
    let lowered = reason.to_lowercase();
    if lowered.contains("never came") || classify_message(&lowered) == ErrorKind::Timeout {
        ScraperError::Timeout {
            url: url.to_owned(),
            timeout_ms,
        }
    } else if lowered.contains("net::err_") {
        ScraperError::Network {
            url: url.to_owned(),
            reason,
        }
    } else {
        ScraperError::Renderer(reason)
    }
}

/// Pages whose status the browser cannot report are assumed to have loaded.
fn document_status(value: Option<&serde_json::Value>) -> u16 {
    value
        .and_then(serde_json::Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .filter(|status| *status > 0)
        .unwrap_or(200)
}
