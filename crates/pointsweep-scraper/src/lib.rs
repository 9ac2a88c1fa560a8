//! Crawl, extract and reconcile cashback campaigns from point sites.

pub mod builder;
pub mod cashback;
pub mod detail;
pub mod error;
pub mod pagination;
pub mod pipeline;
pub mod platform;
pub mod rate_limit;
pub mod reconcile;
pub mod renderer;
pub mod retry;
pub mod sink;

pub use builder::{PageExtraction, RecordBuilder};
pub use cashback::CashbackExtractor;
pub use detail::{DetailEnricher, DetailOutcome};
pub use error::{ErrorKind, ScraperError, SinkError};
pub use pagination::{PageOutput, PaginationTraversal, StopReason, TraversalState};
pub use pipeline::{CategoryReport, CategoryStatus, Pipeline, PipelineOptions, RunOutcome, RunReport};
pub use rate_limit::RequestPacer;
pub use reconcile::{reconcile, ChangeSummary, ReconciledDataset, Reconciler};
#[cfg(feature = "browser")]
pub use renderer::{BrowserRenderer, BrowserRendererFactory};
pub use renderer::{
    HttpRenderer, HttpRendererFactory, Navigation, PageRenderer, RenderSession, RendererFactory,
};
pub use retry::{RetryManager, RetryPolicies, RetryPolicy, RetryStrategy};
pub use sink::{Baseline, CampaignSink, MemorySink};
