//! Scripted in-memory renderer shared by the traversal and pipeline tests.
//!
//! Navigations are answered from a per-URL reply queue and scripts from a
//! per-script queue; the last reply in a queue repeats forever. Every call is
//! logged so tests can assert on what was (and was not) requested.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pointsweep_core::SiteConfig;
use pointsweep_scraper::{Navigation, PageRenderer, RendererFactory, ScraperError};
use serde_json::json;

#[derive(Debug, Clone)]
pub enum Reply {
    Html(String),
    Status(u16),
    Timeout,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, VecDeque<Reply>>,
    scripts: HashMap<String, VecDeque<String>>,
    log: Vec<String>,
    launches: u32,
    closes: u32,
}

/// Handle shared by the test, the factory and every renderer it launches.
#[derive(Clone, Default)]
pub struct FakeWeb {
    state: Arc<Mutex<State>>,
}

impl FakeWeb {
    pub fn route(&self, url: &str, replies: Vec<Reply>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(url.to_string(), replies.into());
        self
    }

    pub fn page(&self, url: &str, html: String) -> &Self {
        self.route(url, vec![Reply::Html(html)])
    }

    /// Evaluating `script` replaces the current page with the next html.
    pub fn script(&self, script: &str, pages: Vec<String>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(script.to_string(), pages.into());
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        let wanted = format!("GET {url}");
        self.log().iter().filter(|entry| **entry == wanted).count()
    }

    pub fn launches(&self) -> u32 {
        self.state.lock().unwrap().launches
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn factory(&self) -> FakeFactory {
        FakeFactory { web: self.clone() }
    }

    pub fn renderer(&self) -> FakeRenderer {
        FakeRenderer {
            web: self.clone(),
            current: None,
        }
    }
}

fn next_in<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

pub struct FakeRenderer {
    web: FakeWeb,
    current: Option<String>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<Navigation, ScraperError> {
        let reply = {
            let mut state = self.web.state.lock().unwrap();
            state.log.push(format!("GET {url}"));
            state.routes.get_mut(url).and_then(next_in)
        };
        match reply {
            Some(Reply::Html(html)) => {
                self.current = Some(html);
                Ok(Navigation {
                    status: 200,
                    final_url: url.to_string(),
                })
            }
            Some(Reply::Status(status)) => {
                self.current = Some(String::new());
                Ok(Navigation {
                    status,
                    final_url: url.to_string(),
                })
            }
            Some(Reply::Timeout) => Err(ScraperError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }),
            None => Ok(Navigation {
                status: 404,
                final_url: url.to_string(),
            }),
        }
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, ScraperError> {
        let html = {
            let mut state = self.web.state.lock().unwrap();
            state.log.push(format!("EVAL {script}"));
            state.scripts.get_mut(script).and_then(next_in)
        };
        // An unknown script behaves like a dead "next" control.
        if let Some(html) = html {
            self.current = Some(html);
        }
        Ok(serde_json::Value::Null)
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        self.current
            .clone()
            .ok_or_else(|| ScraperError::Renderer("no page loaded".to_string()))
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.web.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub struct FakeFactory {
    web: FakeWeb,
}

#[async_trait]
impl RendererFactory for FakeFactory {
    async fn launch(&self) -> Result<Box<dyn PageRenderer>, ScraperError> {
        self.web.state.lock().unwrap().launches += 1;
        Ok(Box::new(self.web.renderer()))
    }
}

// ------ fixtures ------

pub const BASE: &str = "https://points.example";

/// A listing page with one `li.item` per id and, optionally, pager links up
/// to `max_page`.
pub fn listing(ids: impl IntoIterator<Item = u32>, max_page: Option<u32>) -> String {
    let items: String = ids
        .into_iter()
        .map(|id| {
            format!(
                r#"<li class="item"><a href="/ad/{id}/"><span class="title">Campaign number {id}</span></a><span class="pt">{}pt</span></li>"#,
                1_000 + id
            )
        })
        .collect();
    let pager: String = max_page
        .map(|max| (1..=max).map(|n| format!("<a class=\"pager\">{n}</a>")).collect())
        .unwrap_or_default();
    format!("<html><body><ul>{items}</ul><div>{pager}</div></body></html>")
}

/// Ids `24 * (page - 1) + 1 ..= 24 * page`.
pub fn page_ids(page: u32) -> std::ops::RangeInclusive<u32> {
    (24 * (page - 1) + 1)..=(24 * page)
}

pub fn category_url(category: &str) -> String {
    format!("{BASE}/list?cat={category}")
}

pub fn page_url(category: &str, page: u32) -> String {
    if page == 1 {
        category_url(category)
    } else {
        format!("{}&page={page}", category_url(category))
    }
}

/// A site with no request delay, listing pages shaped like [`listing`].
pub fn site(pagination: serde_json::Value, categories: &[&str]) -> SiteConfig {
    let categories: Vec<serde_json::Value> = categories
        .iter()
        .map(|id| json!({ "id": id, "name": id, "url": category_url(id) }))
        .collect();
    serde_json::from_value(json!({
        "name": "fake",
        "base_url": BASE,
        "detail_url_pattern": "/ad/(?P<id>\\d+)/",
        "link_selector": "a[href*='/ad/']",
        "item_selector": "li.item",
        "title_selectors": [".title"],
        "cashback_selectors": [".pt"],
        "max_page_selector": "a.pager",
        "pagination": pagination,
        "min_request_delay_ms": 0,
        "categories": categories,
    }))
    .expect("valid site fixture")
}

pub fn query_param_site(categories: &[&str]) -> SiteConfig {
    site(json!({ "kind": "query_param", "param": "page" }), categories)
}
