//! Detail-page enrichment for stubs the listing could not price.
//!
//! Runs after a category's traversal has finished, since visiting a detail
//! page navigates the render context away from the listing. Every fetch is
//! its own retry unit.

use pointsweep_core::{CampaignStub, SiteConfig};
use scraper::Selector;

use crate::builder::{parse_selectors, RecordBuilder};
use crate::cashback::CashbackExtractor;
use crate::error::ScraperError;
use crate::rate_limit::RequestPacer;
use crate::renderer::RenderSession;
use crate::retry::{RetryDecision, RetryManager};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailOutcome {
    pub fetched: usize,
    pub enriched: usize,
    /// Retry units whose fetch exhausted its retries.
    pub failed_units: Vec<String>,
}

pub struct DetailEnricher {
    site: String,
    selectors: Vec<Selector>,
    always: bool,
    max_fetches: usize,
    timeout_ms: u64,
}

impl DetailEnricher {
    /// `None` when the site declares no detail block.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidSiteConfig`] if a detail selector does
    /// not parse.
    pub fn for_site(site: &SiteConfig, timeout_ms: u64) -> Result<Option<Self>, ScraperError> {
        let Some(detail) = &site.detail else {
            return Ok(None);
        };
        Ok(Some(Self {
            site: site.name.clone(),
            selectors: parse_selectors(&site.name, &detail.cashback_selectors)?,
            always: detail.always,
            max_fetches: usize::try_from(detail.max_fetches).unwrap_or(usize::MAX),
            timeout_ms,
        }))
    }

    /// Retry unit id for `stub`'s detail fetch.
    #[must_use]
    pub fn unit(&self, stub: &CampaignStub) -> String {
        format!("{}/detail/{}", self.site, stub.site_id)
    }

    #[must_use]
    pub fn wants(&self, stub: &CampaignStub) -> bool {
        self.always || stub.cashback.is_unknown()
    }

    /// Visit the detail page of each wanted stub, up to `max_fetches`, and
    /// overwrite its cashback when the page yields a known value.
    ///
    /// Fetches that exhaust their retries are recorded on `retry` and leave
    /// the stub unchanged.
    pub async fn enrich(
        &self,
        stubs: &mut [CampaignStub],
        extractor: &CashbackExtractor,
        session: &mut RenderSession<'_>,
        pacer: &mut RequestPacer,
        retry: &mut RetryManager,
    ) -> DetailOutcome {
        let mut outcome = DetailOutcome::default();

        for stub in stubs.iter_mut().filter(|s| self.wants(s)).take(self.max_fetches) {
            let unit = self.unit(stub);
            outcome.fetched += 1;

            let html = loop {
                match self.fetch(&stub.url, session, pacer).await {
                    Ok(html) => break Some(html),
                    Err(e) => match retry.should_retry(&unit, &e) {
                        RetryDecision::Retry { policy, .. } => {
                            if let Err(restart_err) = retry.apply(policy, session).await {
                                let retries = retry.retries(&unit);
                                retry.record_exhausted(
                                    &unit,
                                    restart_err.kind(),
                                    retries,
                                    &restart_err,
                                );
                                break None;
                            }
                        }
                        RetryDecision::GiveUp { kind, retries } => {
                            retry.record_exhausted(&unit, kind, retries, &e);
                            break None;
                        }
                    },
                }
            };

            let Some(html) = html else {
                outcome.failed_units.push(unit);
                continue;
            };

            let (raw, context) = RecordBuilder::detail_texts(&html, &self.selectors);
            let value = extractor.extract(&raw, &context);
            if !value.is_unknown() {
                tracing::debug!(
                    site = %self.site,
                    site_id = %stub.site_id,
                    cashback = value.display_text(),
                    "cashback taken from detail page"
                );
                stub.raw_cashback_text = raw;
                stub.cashback = value;
                outcome.enriched += 1;
            }
        }

        outcome
    }

    async fn fetch(
        &self,
        url: &str,
        session: &mut RenderSession<'_>,
        pacer: &mut RequestPacer,
    ) -> Result<String, ScraperError> {
        pacer.wait().await;
        let renderer = session.renderer().await?;
        let navigation = renderer.navigate(url, self.timeout_ms).await?;
        if navigation.is_error_status() {
            return Err(ScraperError::HttpStatus {
                status: navigation.status,
                url: url.to_owned(),
            });
        }
        renderer.content().await
    }
}
