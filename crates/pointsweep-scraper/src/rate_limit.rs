//! Courtesy pacing between requests to one site.
//!
//! Every navigation, successful or not, goes through [`RequestPacer::wait`]
//! first, so consecutive requests are always at least `min_delay` apart.
//! Category switches add a longer pause, and sites that cap session length
//! get a break after `session_max_requests` requests.

use std::time::Duration;

use pointsweep_core::SiteConfig;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    category_delay: Duration,
    session_max_requests: Option<u32>,
    session_break: Duration,
    last_request: Option<Instant>,
    requests_in_session: u32,
}

impl RequestPacer {
    #[must_use]
    pub fn new(min_delay_ms: u64, category_delay_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            category_delay: Duration::from_millis(category_delay_ms),
            session_max_requests: None,
            session_break: Duration::ZERO,
            last_request: None,
            requests_in_session: 0,
        }
    }

    /// Pause for `break_ms` after every `max_requests` requests.
    #[must_use]
    pub fn with_session_cap(mut self, max_requests: u32, break_ms: u64) -> Self {
        self.session_max_requests = Some(max_requests).filter(|n| *n > 0);
        self.session_break = Duration::from_millis(break_ms);
        self
    }

    /// Pacer for one site; `fallback_delay_ms` applies when the site does not
    /// set its own request delay.
    #[must_use]
    pub fn for_site(site: &SiteConfig, fallback_delay_ms: u64) -> Self {
        let pacer = Self::new(
            site.request_delay_ms(fallback_delay_ms),
            site.category_delay_ms,
        );
        match site.session_max_requests {
            Some(max) => pacer.with_session_cap(max, site.session_break_ms),
            None => pacer,
        }
    }

    /// Wait until the next request is allowed, then record it.
    pub async fn wait(&mut self) {
        if let Some(max) = self.session_max_requests {
            if self.requests_in_session >= max {
                tracing::info!(
                    requests = self.requests_in_session,
                    break_ms = u64::try_from(self.session_break.as_millis()).unwrap_or(u64::MAX),
                    "session request cap reached, taking a break"
                );
                tokio::time::sleep(self.session_break).await;
                self.requests_in_session = 0;
            }
        }

        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        self.last_request = Some(Instant::now());
        self.requests_in_session += 1;
    }

    /// Pause between two categories. No-op before the first request.
    pub async fn category_boundary(&mut self) {
        if self.last_request.is_some() && !self.category_delay.is_zero() {
            tokio::time::sleep(self.category_delay).await;
        }
    }

    #[must_use]
    pub fn requests_in_session(&self) -> u32 {
        self.requests_in_session
    }
}
