//! Turns one rendered listing page into campaign stubs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use pointsweep_core::{CampaignStub, CategoryConfig, Platform, SiteConfig};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::cashback::CashbackExtractor;
use crate::error::ScraperError;
use crate::platform::platform_hint;

/// Titles shorter than this (in characters) are treated as extraction noise.
const MIN_TITLE_CHARS: usize = 3;

/// Stubs found on one page, plus bookkeeping for the caller.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub stubs: Vec<CampaignStub>,
    /// Candidate links dropped for an unparseable id or an unusable title.
    pub skipped: usize,
    /// Highest page number advertised by the page's pagination controls.
    pub max_page: Option<u32>,
}

pub struct RecordBuilder {
    site: String,
    default_platform: Platform,
    detail_pattern: Regex,
    link_selector: Selector,
    item_selector: Selector,
    title_selectors: Vec<Selector>,
    cashback_selectors: Vec<Selector>,
    max_page_selector: Option<Selector>,
    img_selector: Selector,
    extractor: CashbackExtractor,
}

impl RecordBuilder {
    /// Compile the site's selectors and id pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::InvalidSiteConfig`] if a selector or the
    /// detail URL pattern does not parse.
    pub fn new(site: &SiteConfig) -> Result<Self, ScraperError> {
        let invalid = |reason: String| ScraperError::InvalidSiteConfig {
            site: site.name.clone(),
            reason,
        };

        let detail_pattern = Regex::new(&site.detail_url_pattern)
            .map_err(|e| invalid(format!("detail_url_pattern: {e}")))?;

        Ok(Self {
            site: site.name.clone(),
            default_platform: site.default_platform,
            detail_pattern,
            link_selector: parse_selector(&site.name, &site.link_selector)?,
            item_selector: parse_selector(&site.name, &site.item_selector)?,
            title_selectors: parse_selectors(&site.name, &site.title_selectors)?,
            cashback_selectors: parse_selectors(&site.name, &site.cashback_selectors)?,
            max_page_selector: site
                .max_page_selector
                .as_deref()
                .map(|s| parse_selector(&site.name, s))
                .transpose()?,
            img_selector: parse_selector(&site.name, "img")?,
            extractor: CashbackExtractor::new(),
        })
    }

    /// Replace the default cashback strategy chain.
    #[must_use]
    pub fn with_extractor(mut self, extractor: CashbackExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn extractor(&self) -> &CashbackExtractor {
        &self.extractor
    }

    /// Extract every campaign stub from `html`.
    ///
    /// Never fails: a page without matching links yields an empty extraction.
    /// Several links to the same campaign collapse into one stub; the first
    /// link that produces a usable title wins.
    #[must_use]
    pub fn build(
        &self,
        html: &str,
        page_url: &str,
        category: &CategoryConfig,
        observed_at: DateTime<Utc>,
    ) -> PageExtraction {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();

        let mut stubs = Vec::new();
        let mut accepted: HashSet<String> = HashSet::new();
        let mut rejected: HashSet<String> = HashSet::new();
        let mut unparseable = 0usize;

        for anchor in document.select(&self.link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let url = resolve_url(base.as_ref(), href);
            let Some(site_id) = self.site_id(&url) else {
                unparseable += 1;
                continue;
            };
            if accepted.contains(&site_id) {
                continue;
            }

            let container = self.container(anchor);
            let title = self.title(container, anchor);
            if title.chars().count() < MIN_TITLE_CHARS {
                rejected.insert(site_id);
                continue;
            }

            let raw_cashback_text = self.raw_cashback_text(container);
            let context = element_text(container);
            let cashback = self.extractor.extract(&raw_cashback_text, &context);
            let platform_hint = platform_hint(
                &[&title, &url, &context],
                self.default_platform,
                category.apps,
            );

            accepted.insert(site_id.clone());
            stubs.push(CampaignStub {
                site: self.site.clone(),
                site_id,
                title,
                url,
                raw_cashback_text,
                cashback,
                platform_hint,
                category: category.id.clone(),
                observed_at,
            });
        }

        let skipped = unparseable + rejected.difference(&accepted).count();
        if skipped > 0 {
            tracing::debug!(
                site = %self.site,
                category = %category.id,
                skipped,
                "dropped campaign candidates"
            );
        }

        PageExtraction {
            stubs,
            skipped,
            max_page: self.max_page(&document),
        }
    }

    /// Cashback text and surrounding context from a detail page, using the
    /// given selectors. The context is the whole body text.
    #[must_use]
    pub fn detail_texts(html: &str, selectors: &[Selector]) -> (String, String) {
        let document = Html::parse_document(html);
        let raw = selectors
            .iter()
            .flat_map(|selector| document.select(selector))
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let context = element_text(document.root_element());
        (raw, context)
    }

    fn site_id(&self, url: &str) -> Option<String> {
        self.detail_pattern
            .captures(url)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str().to_string())
            .filter(|id| !id.is_empty())
    }

    fn container<'a>(&self, anchor: ElementRef<'a>) -> ElementRef<'a> {
        anchor
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| self.item_selector.matches(el))
            .unwrap_or(anchor)
    }

    fn title(&self, container: ElementRef<'_>, anchor: ElementRef<'_>) -> String {
        let from_selectors = self
            .title_selectors
            .iter()
            .filter_map(|selector| container.select(selector).next())
            .map(element_text)
            .find(|text| !text.is_empty());
        if let Some(title) = from_selectors {
            return title;
        }

        let attr_title = anchor
            .value()
            .attr("title")
            .map(normalize_whitespace)
            .filter(|t| !t.is_empty());
        let img_alt = || {
            anchor
                .select(&self.img_selector)
                .filter_map(|img| img.value().attr("alt"))
                .map(normalize_whitespace)
                .find(|alt| !alt.is_empty())
        };

        attr_title
            .or_else(img_alt)
            .unwrap_or_else(|| element_text(anchor))
    }

    fn raw_cashback_text(&self, container: ElementRef<'_>) -> String {
        self.cashback_selectors
            .iter()
            .flat_map(|selector| container.select(selector))
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn max_page(&self, document: &Html) -> Option<u32> {
        let selector = self.max_page_selector.as_ref()?;
        document
            .select(selector)
            .filter_map(|el| element_text(el).parse::<u32>().ok())
            .max()
    }
}

fn parse_selector(site: &str, selector: &str) -> Result<Selector, ScraperError> {
    Selector::parse(selector).map_err(|e| ScraperError::InvalidSiteConfig {
        site: site.to_string(),
        reason: format!("invalid selector '{selector}': {e}"),
    })
}

pub(crate) fn parse_selectors(site: &str, selectors: &[String]) -> Result<Vec<Selector>, ScraperError> {
    selectors.iter().map(|s| parse_selector(site, s)).collect()
}

fn resolve_url(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map_or_else(|| href.to_string(), |u| u.to_string())
}

fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Collapse runs of whitespace (including full-width spaces) to one space and trim.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod tests;
