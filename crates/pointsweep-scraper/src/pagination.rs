//! Category traversal across a site's pagination mechanism.
//!
//! One [`PaginationTraversal`] walks one category, one page per call to
//! [`PaginationTraversal::next_page`]:
//!
//! ```text
//! Start -> FetchingPage -> ExtractingStubs -> DecidingContinuation
//!              ^                                   |
//!              +-----------------------------------+--> Done(reason) | Aborted
//! ```
//!
//! Page N is always fully extracted before page N+1 is requested. A page
//! whose fingerprint matches the previous page means the "next" action did
//! not advance, which ends the traversal rather than looping.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use pointsweep_core::{CampaignStub, CategoryConfig, PaginationMechanism, SiteConfig};
use reqwest::Url;
use serde::Serialize;

use crate::builder::RecordBuilder;
use crate::error::ScraperError;
use crate::rate_limit::RequestPacer;
use crate::renderer::PageRenderer;

/// Why a traversal finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EmptyPage,
    DuplicatePage,
    MaxPageReached,
    PageCapReached,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EmptyPage => write!(f, "empty page"),
            StopReason::DuplicatePage => write!(f, "duplicate page"),
            StopReason::MaxPageReached => write!(f, "last advertised page"),
            StopReason::PageCapReached => write!(f, "page cap"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalState {
    Start,
    FetchingPage(u32),
    ExtractingStubs(u32),
    DecidingContinuation(u32),
    Done(StopReason),
    Aborted,
}

/// Stubs accepted from one page.
#[derive(Debug)]
pub struct PageOutput {
    pub page: u32,
    pub stubs: Vec<CampaignStub>,
}

/// Cheap page identity: the first and last site ids in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    first: String,
    last: String,
}

impl Fingerprint {
    fn of(stubs: &[CampaignStub]) -> Option<Self> {
        Some(Self {
            first: stubs.first()?.site_id.clone(),
            last: stubs.last()?.site_id.clone(),
        })
    }
}

pub struct PaginationTraversal<'a> {
    site: &'a SiteConfig,
    category: &'a CategoryConfig,
    builder: &'a RecordBuilder,
    page_cap: u32,
    timeout_ms: u64,
    state: TraversalState,
    next_page: u32,
    current_url: String,
    previous: Option<Fingerprint>,
    max_page: Option<u32>,
    seen_ids: HashSet<String>,
    pages_fetched: u32,
    skipped: usize,
}

impl<'a> PaginationTraversal<'a> {
    /// Start a fresh traversal of `category`. `page_cap` is the hard upper
    /// bound on pages fetched, whatever the site advertises.
    #[must_use]
    pub fn new(
        site: &'a SiteConfig,
        category: &'a CategoryConfig,
        builder: &'a RecordBuilder,
        page_cap: u32,
        timeout_ms: u64,
    ) -> Self {
        Self {
            site,
            category,
            builder,
            page_cap: page_cap.max(1),
            timeout_ms,
            state: TraversalState::Start,
            next_page: 1,
            current_url: category.url.clone(),
            previous: None,
            max_page: None,
            seen_ids: HashSet::new(),
            pages_fetched: 0,
            skipped: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> TraversalState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, TraversalState::Done(_) | TraversalState::Aborted)
    }

    /// Why the traversal ended, once it ended normally.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            TraversalState::Done(reason) => Some(reason),
            _ => None,
        }
    }

    /// Pages requested so far, including a terminating empty or duplicate page.
    #[must_use]
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Candidate links dropped by the record builder across all pages.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Advance to the next page and return its stubs, or `None` once the
    /// traversal is done.
    ///
    /// # Errors
    ///
    /// Any navigation, script or HTTP status failure moves the traversal to
    /// [`TraversalState::Aborted`] and is returned. Stubs yielded before the
    /// failure remain valid.
    pub async fn next_page(
        &mut self,
        renderer: &mut dyn PageRenderer,
        pacer: &mut RequestPacer,
    ) -> Result<Option<PageOutput>, ScraperError> {
        if self.is_finished() {
            return Ok(None);
        }

        let page = self.next_page;
        self.state = TraversalState::FetchingPage(page);
        let html = match self.fetch(page, renderer, pacer).await {
            Ok(html) => html,
            Err(e) => {
                self.state = TraversalState::Aborted;
                tracing::warn!(
                    site = %self.site.name,
                    category = %self.category.id,
                    page,
                    error = %e,
                    "traversal aborted"
                );
                return Err(e);
            }
        };
        self.pages_fetched += 1;

        self.state = TraversalState::ExtractingStubs(page);
        let extraction = self
            .builder
            .build(&html, &self.current_url, self.category, Utc::now());
        self.skipped += extraction.skipped;
        if let Some(advertised) = extraction.max_page {
            self.max_page = Some(self.max_page.map_or(advertised, |m| m.max(advertised)));
        }
        tracing::debug!(
            site = %self.site.name,
            category = %self.category.id,
            page,
            stubs = extraction.stubs.len(),
            skipped = extraction.skipped,
            "page extracted"
        );

        let Some(fingerprint) = Fingerprint::of(&extraction.stubs) else {
            self.finish(StopReason::EmptyPage);
            return Ok(None);
        };

        self.state = TraversalState::DecidingContinuation(page);
        if self.previous.as_ref() == Some(&fingerprint) {
            self.finish(StopReason::DuplicatePage);
            return Ok(None);
        }
        self.previous = Some(fingerprint);

        let mut stubs = extraction.stubs;
        if matches!(self.site.pagination, PaginationMechanism::InfiniteScroll { .. }) {
            // Scrolling keeps earlier items in the DOM; only report new ones.
            stubs.retain(|stub| !self.seen_ids.contains(&stub.site_id));
        }
        self.seen_ids
            .extend(stubs.iter().map(|stub| stub.site_id.clone()));

        if self.max_page.is_some_and(|max| page >= max) {
            self.finish(StopReason::MaxPageReached);
        } else if page >= self.page_cap {
            self.finish(StopReason::PageCapReached);
        } else {
            self.next_page = page + 1;
            self.state = TraversalState::FetchingPage(self.next_page);
        }

        Ok(Some(PageOutput { page, stubs }))
    }

    fn finish(&mut self, reason: StopReason) {
        self.state = TraversalState::Done(reason);
        tracing::info!(
            site = %self.site.name,
            category = %self.category.id,
            pages = self.pages_fetched,
            reason = %reason,
            "traversal finished"
        );
    }

    async fn fetch(
        &mut self,
        page: u32,
        renderer: &mut dyn PageRenderer,
        pacer: &mut RequestPacer,
    ) -> Result<String, ScraperError> {
        let site = self.site;
        let category = self.category;
        match &site.pagination {
            PaginationMechanism::QueryParam { param } => {
                let url = if page == 1 {
                    category.url.clone()
                } else {
                    with_page_param(&category.url, param, page).map_err(|reason| {
                        ScraperError::InvalidSiteConfig {
                            site: site.name.clone(),
                            reason,
                        }
                    })?
                };
                self.navigate(&url, renderer, pacer).await?;
            }
            PaginationMechanism::Callback { script, settle_ms } => {
                if page == 1 {
                    self.navigate(&category.url, renderer, pacer).await?;
                } else {
                    let script = script.replace("{page}", &page.to_string());
                    pacer.wait().await;
                    renderer.evaluate(&script).await?;
                    tokio::time::sleep(Duration::from_millis(*settle_ms)).await;
                }
            }
            PaginationMechanism::InfiniteScroll { script, settle_ms } => {
                if page == 1 {
                    self.navigate(&category.url, renderer, pacer).await?;
                } else {
                    pacer.wait().await;
                    renderer.evaluate(script).await?;
                    tokio::time::sleep(Duration::from_millis(*settle_ms)).await;
                }
            }
        }
        renderer.content().await
    }

    async fn navigate(
        &mut self,
        url: &str,
        renderer: &mut dyn PageRenderer,
        pacer: &mut RequestPacer,
    ) -> Result<(), ScraperError> {
        pacer.wait().await;
        let navigation = renderer.navigate(url, self.timeout_ms).await?;
        if navigation.is_error_status() {
            return Err(ScraperError::HttpStatus {
                status: navigation.status,
                url: url.to_owned(),
            });
        }
        self.current_url = navigation.final_url;
        Ok(())
    }
}

/// `url` with its `param` query parameter set to `page`, replacing any
/// existing value.
fn with_page_param(url: &str, param: &str, page: u32) -> Result<String, String> {
    let mut parsed = Url::parse(url).map_err(|e| format!("invalid category url '{url}': {e}"))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(param, &page.to_string());
    Ok(parsed.to_string())
}
