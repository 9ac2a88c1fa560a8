//! One crawl run: every selected category of every site, strictly in
//! sequence, through a single render session.
//!
//! Per site the pipeline builds the record builder, pacer and retry manager,
//! crawls each pending category (traversal, then detail enrichment), and
//! asks the retry manager whether the failed subset should be crawled again.
//! Stubs are handed to the reconciler once a site's categories are settled.

use std::collections::{BTreeMap, HashSet};

use pointsweep_core::{AppConfig, CampaignStub, CategoryConfig, Checkpoint, SiteConfig};
use serde::Serialize;

use crate::builder::RecordBuilder;
use crate::detail::{DetailEnricher, DetailOutcome};
use crate::error::{ErrorKind, ScraperError};
use crate::pagination::{PaginationTraversal, StopReason};
use crate::rate_limit::RequestPacer;
use crate::reconcile::{ReconciledDataset, Reconciler};
use crate::renderer::{RenderSession, RendererFactory};
use crate::retry::{GlobalRetryDecision, RetryDecision, RetryManager, RetryPolicies, UnitFailure};
use crate::sink::{Baseline, CampaignSink};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub navigation_timeout_ms: u64,
    pub max_pages_per_category: u32,
    /// Request delay for sites that do not set their own.
    pub inter_request_delay_ms: u64,
    pub global_retry_threshold: f64,
    pub max_global_retries: u32,
    pub retry_policies: RetryPolicies,
    /// Category ids to crawl; empty means all.
    pub categories: Vec<String>,
}

impl PipelineOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            navigation_timeout_ms: config.navigation_timeout_ms(),
            max_pages_per_category: config.max_pages_per_category,
            inter_request_delay_ms: config.inter_request_delay_ms,
            global_retry_threshold: config.global_retry_threshold,
            max_global_retries: config.max_global_retries,
            retry_policies: RetryPolicies::default(),
            categories: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    fn selects(&self, category: &CategoryConfig) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|id| *id == category.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryStatus {
    Completed { reason: StopReason },
    Failed { kind: ErrorKind },
}

impl std::fmt::Display for CategoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryStatus::Completed { reason } => write!(f, "completed ({reason})"),
            CategoryStatus::Failed { kind } => write!(f, "failed ({kind})"),
        }
    }
}

/// Per-category line of the run summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub site: String,
    pub category: String,
    pub pages: u32,
    pub stubs: usize,
    pub skipped: usize,
    pub detail_fetched: usize,
    pub detail_enriched: usize,
    pub unrecovered_failures: usize,
    #[serde(flatten)]
    pub status: CategoryStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub categories: Vec<CategoryReport>,
    /// Units that were still failed when the run ended.
    pub failures: Vec<UnitFailure>,
    /// Categories not crawled because the checkpoint marks them complete.
    pub resumed: Vec<String>,
    /// Sites whose failure rate stayed over the threshold after every
    /// global retry.
    pub degraded_sites: Vec<String>,
    pub global_retries: u32,
}

impl RunReport {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded_sites.is_empty()
    }

    #[must_use]
    pub fn total_stubs(&self) -> usize {
        self.categories.iter().map(|c| c.stubs).sum()
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub dataset: ReconciledDataset,
    pub report: RunReport,
    pub checkpoint: Checkpoint,
}

/// Result of one attempt sequence at a category.
struct CategoryRun {
    unit: String,
    stubs: Vec<CampaignStub>,
    pages: u32,
    skipped: usize,
    detail: DetailOutcome,
    status: CategoryStatus,
}

impl CategoryRun {
    fn units(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.unit.as_str()).chain(self.detail.failed_units.iter().map(String::as_str))
    }
}

/// Everything a category crawl borrows from its site's context.
struct SiteContext<'s> {
    site: &'s SiteConfig,
    builder: RecordBuilder,
    detail: Option<DetailEnricher>,
    page_cap: u32,
    pacer: RequestPacer,
    retry: RetryManager,
}

pub struct Pipeline<'a> {
    sites: &'a [SiteConfig],
    factory: &'a dyn RendererFactory,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(sites: &'a [SiteConfig], factory: &'a dyn RendererFactory, options: PipelineOptions) -> Self {
        Self {
            sites,
            factory,
            options,
        }
    }

    /// Crawl, reconcile against the sink's baseline and publish.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the baseline cannot be read or the batch
    /// cannot be published, plus anything [`Pipeline::run`] returns.
    pub async fn run_with_sink(
        &self,
        sink: &dyn CampaignSink,
        checkpoint: Checkpoint,
    ) -> Result<RunOutcome, ScraperError> {
        let baseline = sink.baseline().await?;
        let outcome = self.run(checkpoint, &baseline).await?;
        sink.publish(&outcome.dataset.campaigns).await?;
        tracing::info!(
            campaigns = outcome.dataset.campaigns.len(),
            "published campaigns"
        );
        Ok(outcome)
    }

    /// Crawl every selected category not already in `checkpoint` and
    /// reconcile the stubs against `baseline`.
    ///
    /// Unit failures never abort the run; they end up in the report. The
    /// render session is closed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidSiteConfig`] if a site's selectors do
    /// not compile, or the factory's error if no renderer can be launched.
    pub async fn run(
        &self,
        checkpoint: Checkpoint,
        baseline: &Baseline,
    ) -> Result<RunOutcome, ScraperError> {
        let contexts = self
            .sites
            .iter()
            .map(|site| self.site_context(site))
            .collect::<Result<Vec<_>, _>>()?;

        let mut session = RenderSession::new(self.factory);
        let result = self.run_sites(contexts, checkpoint, baseline, &mut session).await;
        session.close().await;
        result
    }

    fn site_context<'s>(&self, site: &'s SiteConfig) -> Result<SiteContext<'s>, ScraperError> {
        Ok(SiteContext {
            site,
            builder: RecordBuilder::new(site)?,
            detail: DetailEnricher::for_site(site, self.options.navigation_timeout_ms)?,
            page_cap: site.page_cap(self.options.max_pages_per_category),
            pacer: RequestPacer::for_site(site, self.options.inter_request_delay_ms),
            retry: RetryManager::new(
                self.options.retry_policies.clone(),
                self.options.global_retry_threshold,
                self.options.max_global_retries,
            ),
        })
    }

    async fn run_sites(
        &self,
        contexts: Vec<SiteContext<'_>>,
        mut checkpoint: Checkpoint,
        baseline: &Baseline,
        session: &mut RenderSession<'_>,
    ) -> Result<RunOutcome, ScraperError> {
        let mut reconciler = Reconciler::new(baseline);
        for site in self.sites {
            if let Some(rate) = site.points_per_yen {
                reconciler = reconciler.with_points_per_yen(site.name.clone(), rate);
            }
        }
        let mut report = RunReport::default();

        for mut ctx in contexts {
            let site = ctx.site;
            let selected: Vec<&CategoryConfig> = site
                .categories
                .iter()
                .filter(|c| self.options.selects(c))
                .collect();
            let (resumed, pending): (Vec<&CategoryConfig>, Vec<&CategoryConfig>) = selected
                .iter()
                .copied()
                .partition(|c| checkpoint.is_completed(&site.name, &c.id));
            for category in &resumed {
                tracing::info!(site = %site.name, category = %category.id, "already complete, skipping");
                report.resumed.push(format!("{}/{}", site.name, category.id));
            }
            if pending.is_empty() {
                continue;
            }

            // Launch up front so a broken renderer fails the run, not a unit.
            session.renderer().await?;

            let mut runs = self.crawl_site(&mut ctx, &pending, session).await?;

            let mut site_failed = false;
            for category in &pending {
                let Some(run) = runs.remove(category.id.as_str()) else {
                    continue;
                };
                let unrecovered = run
                    .units()
                    .filter(|unit| ctx.retry.failure(unit).is_some())
                    .count();
                let category_failed = ctx.retry.failure(&run.unit).is_some();
                if category_failed {
                    site_failed = true;
                } else {
                    checkpoint.mark_completed(&site.name, &category.id);
                }

                let line = CategoryReport {
                    site: site.name.clone(),
                    category: category.id.clone(),
                    pages: run.pages,
                    stubs: run.stubs.len(),
                    skipped: run.skipped,
                    detail_fetched: run.detail.fetched,
                    detail_enriched: run.detail.enriched,
                    unrecovered_failures: unrecovered,
                    status: run.status,
                };
                tracing::info!(
                    site = %line.site,
                    category = %line.category,
                    pages = line.pages,
                    stubs = line.stubs,
                    skipped = line.skipped,
                    unrecovered_failures = line.unrecovered_failures,
                    status = ?line.status,
                    "category summary"
                );
                report.categories.push(line);
                reconciler.ingest(run.stubs);
            }
            if !site_failed && resumed.is_empty() && selected.len() == site.categories.len() {
                reconciler.mark_site_complete(site.name.clone());
            }

            report.failures.extend(ctx.retry.failures().cloned());
            report.global_retries += ctx.retry.global_retries();
            if ctx.retry.is_degraded() {
                report.degraded_sites.push(site.name.clone());
            }
        }

        let dataset = reconciler.finish();
        tracing::info!(
            campaigns = dataset.campaigns.len(),
            new = dataset.summary.new,
            changed = dataset.summary.changed,
            unchanged = dataset.summary.unchanged,
            missing = dataset.summary.missing.len(),
            failures = report.failures.len(),
            "run finished"
        );
        if report.is_degraded() {
            tracing::warn!(sites = ?report.degraded_sites, "run degraded, dataset is partial");
        }

        Ok(RunOutcome {
            dataset,
            report,
            checkpoint,
        })
    }

    /// Crawl `pending` categories, then re-crawl the failed subset for as
    /// long as the retry manager escalates.
    async fn crawl_site<'c>(
        &self,
        ctx: &mut SiteContext<'_>,
        pending: &[&'c CategoryConfig],
        session: &mut RenderSession<'_>,
    ) -> Result<BTreeMap<&'c str, CategoryRun>, ScraperError> {
        let mut runs: BTreeMap<&'c str, CategoryRun> = BTreeMap::new();
        let mut queue: Vec<&'c CategoryConfig> = pending.to_vec();
        let mut crawled: u32 = 0;

        loop {
            for &category in &queue {
                if crawled > 0 {
                    ctx.pacer.category_boundary().await;
                    if ctx
                        .site
                        .restart_every_categories
                        .is_some_and(|n| n > 0 && crawled % n == 0)
                    {
                        tracing::info!(site = %ctx.site.name, crawled, "recycling render context");
                        session.restart().await?;
                    }
                }
                let run = self.crawl_category(ctx, category, session).await;
                runs.insert(category.id.as_str(), run);
                crawled += 1;
            }

            let total_units: usize = runs.values().map(|r| 1 + r.detail.fetched).sum();
            match ctx.retry.global_decision(total_units) {
                GlobalRetryDecision::Healthy { .. } => break,
                GlobalRetryDecision::Degraded { failure_rate } => {
                    tracing::warn!(
                        site = %ctx.site.name,
                        failure_rate,
                        failed = ctx.retry.failed_count(),
                        "global retries exhausted, site degraded"
                    );
                    break;
                }
                GlobalRetryDecision::Retry { .. } => {
                    let failed: HashSet<String> = ctx.retry.reset_failed().into_iter().collect();
                    queue = pending
                        .iter()
                        .copied()
                        .filter(|c| {
                            runs.get(c.id.as_str())
                                .is_some_and(|run| run.units().any(|unit| failed.contains(unit)))
                        })
                        .collect();
                    if queue.is_empty() {
                        break;
                    }
                }
            }
        }

        Ok(runs)
    }

    /// Traverse one category under its retry policy, then enrich its stubs
    /// from detail pages. A failed attempt is discarded and the category is
    /// traversed afresh; when retries run out, the last attempt's stubs are
    /// kept.
    async fn crawl_category(
        &self,
        ctx: &mut SiteContext<'_>,
        category: &CategoryConfig,
        session: &mut RenderSession<'_>,
    ) -> CategoryRun {
        let unit = format!("{}/{}", ctx.site.name, category.id);

        let (mut stubs, pages, skipped, status) = loop {
            let mut traversal = PaginationTraversal::new(
                ctx.site,
                category,
                &ctx.builder,
                ctx.page_cap,
                self.options.navigation_timeout_ms,
            );
            let mut stubs = Vec::new();
            let attempt = drive(&mut traversal, session, &mut ctx.pacer, &mut stubs).await;

            let err = match attempt {
                Ok(()) => {
                    let reason = traversal.stop_reason().unwrap_or(StopReason::EmptyPage);
                    break (
                        stubs,
                        traversal.pages_fetched(),
                        traversal.skipped(),
                        CategoryStatus::Completed { reason },
                    );
                }
                Err(e) => e,
            };

            let failed_with = match ctx.retry.should_retry(&unit, &err) {
                RetryDecision::Retry { policy, .. } => match ctx.retry.apply(policy, session).await {
                    Ok(()) => continue,
                    Err(restart_err) => {
                        let retries = ctx.retry.retries(&unit);
                        ctx.retry
                            .record_exhausted(&unit, restart_err.kind(), retries, &restart_err);
                        restart_err.kind()
                    }
                },
                RetryDecision::GiveUp { kind, retries } => {
                    ctx.retry.record_exhausted(&unit, kind, retries, &err);
                    kind
                }
            };
            break (
                stubs,
                traversal.pages_fetched(),
                traversal.skipped(),
                CategoryStatus::Failed { kind: failed_with },
            );
        };

        let detail = match &ctx.detail {
            Some(enricher) => {
                enricher
                    .enrich(
                        &mut stubs,
                        ctx.builder.extractor(),
                        session,
                        &mut ctx.pacer,
                        &mut ctx.retry,
                    )
                    .await
            }
            None => DetailOutcome::default(),
        };

        CategoryRun {
            unit,
            stubs,
            pages,
            skipped,
            detail,
            status,
        }
    }
}

/// Pull pages until the traversal finishes, collecting stubs as they come.
async fn drive(
    traversal: &mut PaginationTraversal<'_>,
    session: &mut RenderSession<'_>,
    pacer: &mut RequestPacer,
    stubs: &mut Vec<CampaignStub>,
) -> Result<(), ScraperError> {
    loop {
        let renderer = session.renderer().await?;
        match traversal.next_page(renderer, pacer).await? {
            Some(page) => stubs.extend(page.stubs),
            None => return Ok(()),
        }
    }
}
