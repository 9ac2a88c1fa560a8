//! Category traversal against a scripted renderer: every termination path
//! and each pagination mechanism.

mod common;

use common::{listing, page_ids, page_url, query_param_site, site, FakeWeb, Reply};
use pointsweep_core::{CampaignStub, SiteConfig};
use pointsweep_scraper::{
    PaginationTraversal, RecordBuilder, RequestPacer, ScraperError, StopReason, TraversalState,
};
use serde_json::json;

/// Drive a traversal of the site's first category to the end, returning the
/// stubs of every page and the terminal error, if any.
async fn traverse(
    site: &SiteConfig,
    web: &FakeWeb,
    page_cap: u32,
) -> (Vec<Vec<CampaignStub>>, TraversalState, Option<ScraperError>) {
    let builder = RecordBuilder::new(site).expect("fixture selectors compile");
    let category = &site.categories[0];
    let mut traversal = PaginationTraversal::new(site, category, &builder, page_cap, 1_000);
    let mut renderer = web.renderer();
    let mut pacer = RequestPacer::new(0, 0);

    let mut pages = Vec::new();
    loop {
        match traversal.next_page(&mut renderer, &mut pacer).await {
            Ok(Some(page)) => pages.push(page.stubs),
            Ok(None) => return (pages, traversal.state(), None),
            Err(e) => return (pages, traversal.state(), Some(e)),
        }
    }
}

fn total(pages: &[Vec<CampaignStub>]) -> usize {
    pages.iter().map(Vec::len).sum()
}

// ------ query parameter ------

#[tokio::test]
async fn echoed_fourth_page_stops_after_three_pages() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    for page in 1..=3 {
        web.page(&page_url("shopping", page), listing(page_ids(page), None));
    }
    web.page(&page_url("shopping", 4), listing(page_ids(3), None));
    web.page(&page_url("shopping", 5), listing(page_ids(5), None));

    let (pages, state, err) = traverse(&site, &web, 50).await;

    assert!(err.is_none(), "unexpected error: {err:?}");
    assert_eq!(pages.len(), 3);
    assert_eq!(total(&pages), 72);
    assert_eq!(state, TraversalState::Done(StopReason::DuplicatePage));
    assert_eq!(web.requests_to(&page_url("shopping", 4)), 1);
    assert_eq!(web.requests_to(&page_url("shopping", 5)), 0);
}

#[tokio::test]
async fn empty_page_ends_traversal() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    web.page(&page_url("shopping", 1), listing(page_ids(1), None));
    web.page(&page_url("shopping", 2), listing(std::iter::empty(), None));

    let (pages, state, _) = traverse(&site, &web, 50).await;

    assert_eq!(total(&pages), 24);
    assert_eq!(state, TraversalState::Done(StopReason::EmptyPage));
}

#[tokio::test]
async fn short_last_page_is_not_a_stop_signal() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    web.page(&page_url("shopping", 1), listing(page_ids(1), None));
    web.page(&page_url("shopping", 2), listing(25..=30, None));
    web.page(&page_url("shopping", 3), listing(31..=54, None));
    web.page(&page_url("shopping", 4), listing(std::iter::empty(), None));

    let (pages, state, _) = traverse(&site, &web, 50).await;

    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![24, 6, 24]);
    assert_eq!(state, TraversalState::Done(StopReason::EmptyPage));
}

#[tokio::test]
async fn page_cap_applies_whatever_the_site_advertises() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    for page in 1..=10 {
        web.page(&page_url("shopping", page), listing(page_ids(page), Some(10)));
    }

    let (pages, state, _) = traverse(&site, &web, 2).await;

    assert_eq!(total(&pages), 48);
    assert_eq!(state, TraversalState::Done(StopReason::PageCapReached));
    assert_eq!(web.requests_to(&page_url("shopping", 3)), 0);
}

#[tokio::test]
async fn advertised_last_page_ends_traversal() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    for page in 1..=3 {
        web.page(&page_url("shopping", page), listing(page_ids(page), Some(2)));
    }

    let (pages, state, _) = traverse(&site, &web, 50).await;

    assert_eq!(pages.len(), 2);
    assert_eq!(state, TraversalState::Done(StopReason::MaxPageReached));
    assert_eq!(web.requests_to(&page_url("shopping", 3)), 0);
}

#[tokio::test]
async fn error_status_aborts_and_keeps_earlier_pages() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    web.page(&page_url("shopping", 1), listing(page_ids(1), None));
    web.route(&page_url("shopping", 2), vec![Reply::Status(503)]);

    let (pages, state, err) = traverse(&site, &web, 50).await;

    assert_eq!(total(&pages), 24);
    assert_eq!(state, TraversalState::Aborted);
    assert!(
        matches!(err, Some(ScraperError::HttpStatus { status: 503, .. })),
        "expected 503, got {err:?}"
    );
}

#[tokio::test]
async fn timeout_aborts_traversal() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    web.route(&page_url("shopping", 1), vec![Reply::Timeout]);

    let (pages, state, err) = traverse(&site, &web, 50).await;

    assert!(pages.is_empty());
    assert_eq!(state, TraversalState::Aborted);
    assert!(matches!(err, Some(ScraperError::Timeout { .. })));
}

// ------ in-page callback ------

#[tokio::test]
async fn dead_callback_is_detected_by_fingerprint() {
    let site = site(
        json!({ "kind": "callback", "script": "goPage({page})", "settle_ms": 0 }),
        &["shopping"],
    );
    let web = FakeWeb::default();
    web.page(&page_url("shopping", 1), listing(page_ids(1), None));
    web.script("goPage(2)", vec![listing(page_ids(2), None)]);
    // goPage(3) is never registered: the control exists but does nothing.

    let (pages, state, _) = traverse(&site, &web, 50).await;

    assert_eq!(total(&pages), 48);
    assert_eq!(state, TraversalState::Done(StopReason::DuplicatePage));
    assert!(!web.log().iter().any(|entry| entry == "EVAL goPage(4)"));
    assert_eq!(web.requests_to(&page_url("shopping", 1)), 1);
}

// ------ infinite scroll ------

#[tokio::test]
async fn infinite_scroll_reports_only_new_items() {
    let site = site(
        json!({ "kind": "infinite_scroll", "script": "scroll()", "settle_ms": 0 }),
        &["apps"],
    );
    let web = FakeWeb::default();
    web.page(&page_url("apps", 1), listing(page_ids(1), None));
    web.script(
        "scroll()",
        vec![listing(1..=48, None), listing(1..=60, None), listing(1..=60, None)],
    );

    let (pages, state, _) = traverse(&site, &web, 50).await;

    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![24, 24, 12]);
    let mut ids: Vec<String> = pages.iter().flatten().map(|s| s.site_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 60);
    assert_eq!(state, TraversalState::Done(StopReason::DuplicatePage));
}

#[tokio::test(start_paused = true)]
async fn scroll_requests_are_paced_like_navigations() {
    let site = site(
        json!({ "kind": "infinite_scroll", "script": "scroll()", "settle_ms": 0 }),
        &["apps"],
    );
    let web = FakeWeb::default();
    web.page(&page_url("apps", 1), listing(page_ids(1), None));
    web.script(
        "scroll()",
        vec![listing(1..=48, None), listing(1..=60, None), listing(1..=60, None)],
    );

    let builder = RecordBuilder::new(&site).unwrap();
    let mut traversal =
        PaginationTraversal::new(&site, &site.categories[0], &builder, 50, 1_000);
    let mut renderer = web.renderer();
    let mut pacer = RequestPacer::new(2_000, 0);

    let start = tokio::time::Instant::now();
    while traversal.next_page(&mut renderer, &mut pacer).await.unwrap().is_some() {}

    let scrolls = web.log().iter().filter(|entry| entry.starts_with("EVAL")).count();
    assert_eq!(scrolls, 3);
    assert_eq!(pacer.requests_in_session(), 4);
    assert!(start.elapsed() >= std::time::Duration::from_millis(6_000));
}

#[tokio::test]
async fn finished_traversal_yields_nothing_more() {
    let site = query_param_site(&["shopping"]);
    let web = FakeWeb::default();
    web.page(&page_url("shopping", 1), listing(std::iter::empty(), None));

    let builder = RecordBuilder::new(&site).unwrap();
    let mut traversal =
        PaginationTraversal::new(&site, &site.categories[0], &builder, 50, 1_000);
    let mut renderer = web.renderer();
    let mut pacer = RequestPacer::new(0, 0);

    assert!(traversal.next_page(&mut renderer, &mut pacer).await.unwrap().is_none());
    assert!(traversal.is_finished());
    assert!(traversal.next_page(&mut renderer, &mut pacer).await.unwrap().is_none());
    assert_eq!(web.log().len(), 1);
}
