use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::campaigns::Platform;
use crate::ConfigError;

/// How a site exposes page N+1 of a category listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationMechanism {
    /// Page N is a separate URL: the category URL with `param=N`.
    QueryParam { param: String },
    /// Page N is reached by evaluating an in-page script. `{page}` in the
    /// script is replaced with the target page number.
    Callback {
        script: String,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    /// More items load below the current ones after scrolling.
    InfiniteScroll {
        #[serde(default = "default_scroll_script")]
        script: String,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
}

fn default_settle_ms() -> u64 {
    2500
}

fn default_scroll_script() -> String {
    "window.scrollTo(0, document.body.scrollHeight)".to_string()
}

fn default_platform() -> Platform {
    Platform::Web
}

fn default_max_fetches() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    /// App-install categories default to `unknown` platform rather than the
    /// site's default when no platform keyword is found.
    #[serde(default)]
    pub apps: bool,
}

/// Detail-page enrichment for stubs the listing could not price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    pub cashback_selectors: Vec<String>,
    /// Visit every stub's detail page, not only those with unknown cashback.
    #[serde(default)]
    pub always: bool,
    #[serde(default = "default_max_fetches")]
    pub max_fetches: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    /// Regex with a named `id` group capturing the site-assigned campaign id.
    pub detail_url_pattern: String,
    pub link_selector: String,
    /// Nearest ancestor of a detail link that holds one campaign's markup.
    pub item_selector: String,
    #[serde(default)]
    pub title_selectors: Vec<String>,
    #[serde(default)]
    pub cashback_selectors: Vec<String>,
    pub max_page_selector: Option<String>,
    pub pagination: PaginationMechanism,
    #[serde(default = "default_platform")]
    pub default_platform: Platform,
    pub min_request_delay_ms: Option<u64>,
    #[serde(default)]
    pub category_delay_ms: u64,
    pub max_pages: Option<u32>,
    pub points_per_yen: Option<f64>,
    pub restart_every_categories: Option<u32>,
    pub session_max_requests: Option<u32>,
    #[serde(default)]
    pub session_break_ms: u64,
    pub detail: Option<DetailConfig>,
    pub categories: Vec<CategoryConfig>,
}

impl SiteConfig {
    /// Page cap for this site: the tighter of the global cap and the site's own.
    #[must_use]
    pub fn page_cap(&self, global_cap: u32) -> u32 {
        self.max_pages.map_or(global_cap, |cap| cap.min(global_cap))
    }

    #[must_use]
    pub fn request_delay_ms(&self, fallback_ms: u64) -> u64 {
        self.min_request_delay_ms.unwrap_or(fallback_ms)
    }

    #[must_use]
    pub fn category(&self, id: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitesFile {
    pub sites: Vec<SiteConfig>,
}

impl SitesFile {
    #[must_use]
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}

/// Load and validate the site catalogue from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sites(path: &Path) -> Result<SitesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SitesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let sites_file: SitesFile =
        serde_yaml::from_str(&content).map_err(ConfigError::SitesFileParse)?;

    validate_sites(&sites_file)?;

    Ok(sites_file)
}

fn validate_sites(sites_file: &SitesFile) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();

    for site in &sites_file.sites {
        if site.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "site name must be non-empty".to_string(),
            ));
        }

        if !seen_names.insert(site.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name: '{}'",
                site.name
            )));
        }

        let pattern = Regex::new(&site.detail_url_pattern).map_err(|e| {
            ConfigError::Validation(format!(
                "site '{}' has an invalid detail_url_pattern: {e}",
                site.name
            ))
        })?;
        if !pattern.capture_names().flatten().any(|name| name == "id") {
            return Err(ConfigError::Validation(format!(
                "site '{}' detail_url_pattern has no named 'id' group",
                site.name
            )));
        }

        if let Some(rate) = site.points_per_yen {
            if rate.is_nan() || rate <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "site '{}' has non-positive points_per_yen {rate}",
                    site.name
                )));
            }
        }

        if site.categories.is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' declares no categories",
                site.name
            )));
        }

        let mut seen_categories = HashSet::new();
        for category in &site.categories {
            if !seen_categories.insert(category.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "site '{}' has duplicate category id: '{}'",
                    site.name, category.id
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "sites_test.rs"]
mod tests;
