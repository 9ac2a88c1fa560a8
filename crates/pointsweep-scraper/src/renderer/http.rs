//! Script-less renderer over `reqwest`, for sites whose listings are served
//! as plain HTML and paginate through query parameters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Navigation, PageRenderer, RendererFactory};
use crate::error::ScraperError;

pub struct HttpRendererFactory {
    client: Client,
}

impl HttpRendererFactory {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed (e.g., invalid TLS config).
    pub fn new(user_agent: &str) -> Result<Self, ScraperError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RendererFactory for HttpRendererFactory {
    async fn launch(&self) -> Result<Box<dyn PageRenderer>, ScraperError> {
        Ok(Box::new(HttpRenderer {
            client: self.client.clone(),
            body: None,
        }))
    }
}

pub struct HttpRenderer {
    client: Client,
    body: Option<String>,
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<Navigation, ScraperError> {
        self.body = None;
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| request_error(url, timeout_ms, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(url, timeout_ms, e))?;

        if looks_like_bot_challenge(&body) {
            return Err(ScraperError::BotChallenge {
                url: url.to_owned(),
            });
        }

        tracing::debug!(url, status, bytes = body.len(), "page fetched");
        self.body = Some(body);
        Ok(Navigation { status, final_url })
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value, ScraperError> {
        Err(ScraperError::Script {
            reason: "script evaluation requires a scripting renderer".to_string(),
        })
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        self.body
            .clone()
            .ok_or_else(|| ScraperError::Renderer("no page loaded".to_string()))
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.body = None;
        Ok(())
    }
}

fn request_error(url: &str, timeout_ms: u64, err: reqwest::Error) -> ScraperError {
    if err.is_timeout() {
        ScraperError::Timeout {
            url: url.to_owned(),
            timeout_ms,
        }
    } else if err.is_connect() {
        ScraperError::Network {
            url: url.to_owned(),
            reason: err.to_string(),
        }
    } else {
        ScraperError::Http(err)
    }
}

/// Recognise anti-bot interstitials (Cloudflare and similar) so they are
/// reported as load failures instead of parsed as empty listings.
pub(crate) fn looks_like_bot_challenge(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    let has_cloudflare_banner = lowered.contains("attention required! | cloudflare");
    let has_challenge_platform = lowered.contains("/cdn-cgi/challenge-platform/");
    let has_just_a_moment = lowered.contains("just a moment...");
    let has_cookie_gate = lowered.contains("please enable cookies");
    let has_cf_chl = lowered.contains("cf-chl-");

    has_cloudflare_banner
        || has_challenge_platform
        || (has_just_a_moment && has_cookie_gate)
        || (has_just_a_moment && has_cf_chl)
}
