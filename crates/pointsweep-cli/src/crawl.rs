//! `crawl` and `sites` command handlers.
//!
//! Called from `main` once config and the site catalogue are loaded. Unit
//! failures inside the run are reported in the summary, not propagated; only
//! config, renderer and sink errors make the command fail.

use pointsweep_core::{AppConfig, Checkpoint, PaginationMechanism, SiteConfig, SitesFile};
use pointsweep_scraper::{
    HttpRendererFactory, Pipeline, PipelineOptions, RendererFactory, RunOutcome,
};

use crate::checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint};
use crate::sink::JsonFileSink;

/// Built with the headless browser renderer.
const SCRIPTING_RENDERER: bool = cfg!(feature = "browser");

#[derive(Debug, Clone, Default)]
pub(crate) struct CrawlArgs {
    pub site: Option<String>,
    pub categories: Vec<String>,
    pub fresh: bool,
    pub dry_run: bool,
}

/// Sites paginating through in-page scripts cannot be walked by the HTTP
/// renderer.
fn needs_scripting(site: &SiteConfig) -> bool {
    !matches!(site.pagination, PaginationMechanism::QueryParam { .. })
}

/// Resolve the sites to crawl for `args`.
///
/// Without the `browser` feature, sites that need scripting are skipped, or
/// rejected when named with `--site`.
///
/// # Errors
///
/// Fails if `--site` names an unknown site or a site this build cannot
/// render, or if a `--category` id matches no selected site.
pub(crate) fn select_sites(sites: &SitesFile, args: &CrawlArgs) -> anyhow::Result<Vec<SiteConfig>> {
    let selected: Vec<SiteConfig> = match &args.site {
        Some(name) => {
            let site = sites
                .site(name)
                .ok_or_else(|| anyhow::anyhow!("site '{name}' not found in the site catalogue"))?;
            if needs_scripting(site) && !SCRIPTING_RENDERER {
                anyhow::bail!(
                    "site '{name}' paginates with in-page scripts and needs a scripting renderer; rebuild with --features browser"
                );
            }
            vec![site.clone()]
        }
        None => sites
            .sites
            .iter()
            .filter(|site| {
                if needs_scripting(site) && !SCRIPTING_RENDERER {
                    tracing::warn!(
                        site = %site.name,
                        "skipping site: paginates with in-page scripts, which the HTTP renderer cannot run"
                    );
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect(),
    };

    for id in &args.categories {
        if !selected.iter().any(|site| site.category(id).is_some()) {
            anyhow::bail!("category '{id}' is not configured for any selected site");
        }
    }

    Ok(selected)
}

/// The headless browser renders every site of a run as soon as one of them
/// needs scripting; otherwise the lighter HTTP renderer is used.
fn uses_browser(sites: &[SiteConfig]) -> bool {
    SCRIPTING_RENDERER && sites.iter().any(needs_scripting)
}

#[cfg(feature = "browser")]
#[allow(clippy::unnecessary_wraps)]
fn browser_factory(config: &AppConfig) -> Option<Box<dyn RendererFactory>> {
    Some(Box::new(
        pointsweep_scraper::BrowserRendererFactory::new(&config.user_agent)
            .with_sandbox(config.browser_sandbox),
    ))
}

#[cfg(not(feature = "browser"))]
fn browser_factory(_config: &AppConfig) -> Option<Box<dyn RendererFactory>> {
    None
}

fn renderer_factory(
    config: &AppConfig,
    sites: &[SiteConfig],
) -> anyhow::Result<Box<dyn RendererFactory>> {
    if uses_browser(sites) {
        if let Some(factory) = browser_factory(config) {
            tracing::info!(sandbox = config.browser_sandbox, "using headless browser renderer");
            return Ok(factory);
        }
    }
    let factory = HttpRendererFactory::new(&config.user_agent)
        .map_err(|e| anyhow::anyhow!("failed to build HTTP renderer: {e}"))?;
    Ok(Box::new(factory))
}

/// True when every selected category of `sites` is in `checkpoint`.
fn cycle_complete(sites: &[SiteConfig], categories: &[String], checkpoint: &Checkpoint) -> bool {
    sites.iter().all(|site| {
        site.categories
            .iter()
            .filter(|c| categories.is_empty() || categories.contains(&c.id))
            .all(|c| checkpoint.is_completed(&site.name, &c.id))
    })
}

/// Crawl the selected sites, publish to the output file and persist the
/// checkpoint.
///
/// With `dry_run` set, prints the categories that would be crawled and
/// returns without touching the network or any file.
///
/// # Errors
///
/// Returns an error if site selection fails, the checkpoint cannot be read
/// or written, the renderer cannot be built, or publishing fails.
pub(crate) async fn run_crawl(
    config: &AppConfig,
    sites: &SitesFile,
    args: &CrawlArgs,
) -> anyhow::Result<()> {
    let selected = select_sites(sites, args)?;
    if selected.is_empty() {
        anyhow::bail!("no crawlable sites selected");
    }

    let checkpoint = if args.fresh {
        Checkpoint::default()
    } else {
        load_checkpoint(&config.checkpoint_path)?
    };

    if args.dry_run {
        print_plan(&selected, &args.categories, &checkpoint);
        return Ok(());
    }

    let factory = renderer_factory(config, &selected)?;
    let options = PipelineOptions::from_config(config).with_categories(args.categories.clone());
    let pipeline = Pipeline::new(&selected, factory.as_ref(), options);
    let sink = JsonFileSink::new(&config.output_path);

    tracing::info!(
        sites = selected.len(),
        resumed = checkpoint.len(),
        env = %config.env,
        "starting crawl"
    );
    let outcome = pipeline.run_with_sink(&sink, checkpoint).await?;

    if cycle_complete(&selected, &args.categories, &outcome.checkpoint) {
        clear_checkpoint(&config.checkpoint_path)?;
    } else {
        save_checkpoint(&config.checkpoint_path, &outcome.checkpoint)?;
    }

    print_summary(&outcome);
    Ok(())
}

fn print_plan(sites: &[SiteConfig], categories: &[String], checkpoint: &Checkpoint) {
    for site in sites {
        for category in site
            .categories
            .iter()
            .filter(|c| categories.is_empty() || categories.contains(&c.id))
        {
            let state = if checkpoint.is_completed(&site.name, &category.id) {
                "skip (checkpoint)"
            } else {
                "crawl"
            };
            println!("dry-run: {state:<17} {}/{} {}", site.name, category.id, category.url);
        }
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!(
        "{:<14} {:<14} {:>5} {:>6} {:>7} {:>7} {:>7}  status",
        "site", "category", "pages", "stubs", "skipped", "detail", "failed"
    );
    for line in &outcome.report.categories {
        let detail = format!("{}/{}", line.detail_enriched, line.detail_fetched);
        println!(
            "{:<14} {:<14} {:>5} {:>6} {:>7} {:>7} {:>7}  {}",
            line.site,
            line.category,
            line.pages,
            line.stubs,
            line.skipped,
            detail,
            line.unrecovered_failures,
            line.status,
        );
    }
    for resumed in &outcome.report.resumed {
        println!("{resumed:<29} skipped (checkpoint)");
    }

    let summary = &outcome.dataset.summary;
    println!(
        "campaigns: {} (new {}, changed {}, unchanged {}, missing {})",
        outcome.dataset.campaigns.len(),
        summary.new,
        summary.changed,
        summary.unchanged,
        summary.missing.len()
    );
    for failure in &outcome.report.failures {
        println!(
            "failed: {} [{}] after {} retries: {}",
            failure.unit, failure.kind, failure.retries, failure.error
        );
    }
    if outcome.report.is_degraded() {
        println!(
            "DEGRADED: {} (dataset is partial)",
            outcome.report.degraded_sites.join(", ")
        );
    }
}

/// `sites` command: one line per site and category.
pub(crate) fn print_sites(sites: &SitesFile) {
    for site in &sites.sites {
        let pagination = match &site.pagination {
            PaginationMechanism::QueryParam { param } => format!("query_param({param})"),
            PaginationMechanism::Callback { .. } => "callback".to_string(),
            PaginationMechanism::InfiniteScroll { .. } => "infinite_scroll".to_string(),
        };
        println!("{} {} [{pagination}]", site.name, site.base_url);
        for category in &site.categories {
            let apps = if category.apps { " (apps)" } else { "" };
            println!("  {:<16} {}{apps}", category.id, category.name);
        }
    }
}
