//! `HttpRenderer` and detail enrichment against a local `wiremock` server.
//!
//! No real network traffic is made.

use std::time::Duration;

use chrono::Utc;
use pointsweep_core::{CampaignStub, CashbackValue, Checkpoint, Platform, SiteConfig};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pointsweep_scraper::{
    Baseline, CashbackExtractor, DetailEnricher, ErrorKind, HttpRendererFactory, PageRenderer,
    Pipeline, PipelineOptions, RenderSession, RendererFactory, RequestPacer, RetryManager, RetryPolicies,
    RetryPolicy, RetryStrategy, ScraperError, StopReason,
};

fn factory() -> HttpRendererFactory {
    HttpRendererFactory::new("pointsweep-test/0.1").expect("failed to build test renderer factory")
}

fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

fn moppy_like_site(base: &str) -> SiteConfig {
    serde_json::from_value(json!({
        "name": "moppy",
        "base_url": base,
        "detail_url_pattern": "site_id=(?P<id>\\d+)",
        "link_selector": "a[href*='site_id=']",
        "item_selector": "div.a-list__item",
        "title_selectors": [".a-list__item__title"],
        "cashback_selectors": [".a-list__item__point"],
        "pagination": { "kind": "query_param", "param": "page" },
        "min_request_delay_ms": 0,
        "detail": { "cashback_selectors": [".m-detail__point"] },
        "categories": [
            { "id": "shopping", "name": "Shopping", "url": format!("{base}/category/list.php?parent_category=4") }
        ],
    }))
    .expect("valid site fixture")
}

fn item(id: u32, point_html: &str) -> String {
    format!(
        r#"<div class="a-list__item"><a href="/ad/detail.php?site_id={id}"><p class="a-list__item__title">Online store {id}</p></a><div class="a-list__item__point">{point_html}</div></div>"#
    )
}

// ------ HttpRenderer ------

#[tokio::test]
async fn navigate_returns_status_and_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(html_response("<html><body>ok</body></html>"))
        .mount(&server)
        .await;

    let factory = factory();
    let mut renderer = factory.launch().await.unwrap();
    let nav = renderer
        .navigate(&format!("{}/list", server.uri()), 5_000)
        .await
        .unwrap();

    assert_eq!(nav.status, 200);
    assert!(nav.final_url.ends_with("/list"));
    assert!(renderer.content().await.unwrap().contains("ok"));
}

#[tokio::test]
async fn error_status_is_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let factory = factory();
    let mut renderer = factory.launch().await.unwrap();
    let nav = renderer.navigate(&server.uri(), 5_000).await.unwrap();

    assert_eq!(nav.status, 404);
    assert!(nav.is_error_status());
}

#[tokio::test]
async fn challenge_page_is_a_page_load_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_raw(
            "<html><head><title>Just a moment...</title></head><body>Please enable cookies.</body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let factory = factory();
    let mut renderer = factory.launch().await.unwrap();
    let err = renderer.navigate(&server.uri(), 5_000).await.unwrap_err();

    assert!(matches!(err, ScraperError::BotChallenge { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::PageLoad);
    assert!(renderer.content().await.is_err(), "no body is kept after a challenge");
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_response("late").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let factory = factory();
    let mut renderer = factory.launch().await.unwrap();
    let err = renderer.navigate(&server.uri(), 50).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout, "got {err:?}");
}

#[tokio::test]
async fn scripts_need_a_scripting_renderer() {
    let factory = factory();
    let mut renderer = factory.launch().await.unwrap();
    let err = renderer.evaluate("window.scrollTo(0, 1)").await.unwrap_err();
    assert!(matches!(err, ScraperError::Script { .. }));
}

// ------ detail enrichment ------

fn unpriced_stub(base: &str) -> CampaignStub {
    CampaignStub {
        site: "moppy".to_string(),
        site_id: "77".to_string(),
        title: "Online store 77".to_string(),
        url: format!("{base}/ad/detail.php?site_id=77"),
        raw_cashback_text: String::new(),
        cashback: CashbackValue::unknown(),
        platform_hint: Platform::Web,
        category: "shopping".to_string(),
        observed_at: Utc::now(),
    }
}

#[tokio::test]
async fn detail_page_403_exhausts_three_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ad/detail.php"))
        .respond_with(ResponseTemplate::new(403))
        .expect(4)
        .mount(&server)
        .await;

    let site = moppy_like_site(&server.uri());
    let enricher = DetailEnricher::for_site(&site, 5_000).unwrap().unwrap();
    let factory = factory();
    let mut session = RenderSession::new(&factory);
    let mut pacer = RequestPacer::new(0, 0);
    let mut retry = RetryManager::new(
        RetryPolicies {
            page_load: RetryPolicy::new(3, 0, RetryStrategy::BrowserRestart),
            ..RetryPolicies::default()
        },
        0.3,
        0,
    );
    let mut stubs = vec![unpriced_stub(&server.uri())];

    let outcome = enricher
        .enrich(
            &mut stubs,
            &CashbackExtractor::new(),
            &mut session,
            &mut pacer,
            &mut retry,
        )
        .await;
    session.close().await;

    let unit = enricher.unit(&stubs[0]);
    let failure = retry.failure(&unit).expect("failure recorded");
    assert_eq!(failure.kind, ErrorKind::PageLoad);
    assert_eq!(failure.retries, 3);
    assert_eq!(outcome.failed_units, vec![unit]);
    assert_eq!(outcome.enriched, 0);
    assert!(stubs[0].cashback.is_unknown(), "failed fetch leaves the stub alone");
    assert_eq!(session.launches(), 4);
}

#[tokio::test]
async fn detail_page_prices_unknown_stub() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ad/detail.php"))
        .and(query_param("site_id", "77"))
        .respond_with(html_response(
            r#"<html><body><div class="m-detail__point">購入金額の 2.5% 還元</div><p>先月は3.0%</p></body></html>"#,
        ))
        .mount(&server)
        .await;

    let site = moppy_like_site(&server.uri());
    let enricher = DetailEnricher::for_site(&site, 5_000).unwrap().unwrap();
    let factory = factory();
    let mut session = RenderSession::new(&factory);
    let mut pacer = RequestPacer::new(0, 0);
    let mut retry = RetryManager::new(RetryPolicies::default(), 0.3, 0);
    let mut stubs = vec![unpriced_stub(&server.uri())];

    let outcome = enricher
        .enrich(
            &mut stubs,
            &CashbackExtractor::new(),
            &mut session,
            &mut pacer,
            &mut retry,
        )
        .await;

    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.enriched, 1);
    assert_eq!(stubs[0].cashback, CashbackValue::percentage(2.5).unwrap());
}

// ------ pipeline over HTTP ------

#[tokio::test]
async fn query_param_site_end_to_end() {
    let server = MockServer::start().await;
    let page1: String = (1..=3).map(|id| item(id, "1,200pt")).collect();
    let page2: String = [item(4, "未定"), item(5, "１２，８００ｐｔ")].concat();

    Mock::given(method("GET"))
        .and(path("/category/list.php"))
        .and(query_param_is_missing("page"))
        .respond_with(html_response(&format!("<html><body>{page1}</body></html>")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category/list.php"))
        .and(query_param("page", "2"))
        .respond_with(html_response(&format!("<html><body>{page2}</body></html>")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category/list.php"))
        .and(query_param("page", "3"))
        .respond_with(html_response("<html><body><p>No campaigns</p></body></html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ad/detail.php"))
        .and(query_param("site_id", "4"))
        .respond_with(html_response(
            r#"<html><body><span class="m-detail__point">500円分</span></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let sites = vec![moppy_like_site(&server.uri())];
    let factory = factory();
    let options = PipelineOptions {
        navigation_timeout_ms: 5_000,
        max_pages_per_category: 10,
        inter_request_delay_ms: 0,
        global_retry_threshold: 0.3,
        max_global_retries: 0,
        retry_policies: RetryPolicies::default(),
        categories: Vec::new(),
    };
    let pipeline = Pipeline::new(&sites, &factory, options);

    let outcome = pipeline
        .run(Checkpoint::default(), &Baseline::default())
        .await
        .expect("run succeeds");

    let line = &outcome.report.categories[0];
    assert_eq!(line.stubs, 5);
    assert_eq!(line.pages, 3);
    assert_eq!(line.detail_fetched, 1);
    assert_eq!(line.detail_enriched, 1);
    assert_eq!(
        line.status,
        pointsweep_scraper::CategoryStatus::Completed {
            reason: StopReason::EmptyPage
        }
    );

    let by_id = |id: &str| {
        outcome
            .dataset
            .campaigns
            .iter()
            .find(|c| c.site_id == id)
            .unwrap()
    };
    assert_eq!(by_id("1").cashback.display_text(), "1200pt");
    assert_eq!(by_id("4").cashback.display_text(), "500円");
    assert_eq!(by_id("5").cashback.amount(), Some(12_800.0));
    assert!(outcome.checkpoint.is_completed("moppy", "shopping"));
}
