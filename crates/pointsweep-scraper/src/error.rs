use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("network failure fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("bot challenge page served for {url}")]
    BotChallenge { url: String },

    #[error("expected element structure missing on {url}: {reason}")]
    MissingStructure { url: String, reason: String },

    #[error("page script failed: {reason}")]
    Script { reason: String },

    /// Opaque failure reported by a renderer implementation.
    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("invalid configuration for site {site}: {reason}")]
    InvalidSiteConfig { site: String, reason: String },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode campaigns: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sink lock poisoned")]
    Poisoned,
}

/// Failure classes that select a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    Network,
    PageLoad,
    Element,
    Default,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::PageLoad => write!(f, "pageLoad"),
            ErrorKind::Element => write!(f, "element"),
            ErrorKind::Default => write!(f, "default"),
        }
    }
}

impl ScraperError {
    /// Classify this error for retry purposes.
    ///
    /// Variants raised by this crate map directly; opaque renderer and script
    /// errors fall back to [`classify_message`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScraperError::Timeout { .. } => ErrorKind::Timeout,
            ScraperError::Network { .. } => ErrorKind::Network,
            ScraperError::HttpStatus { .. } | ScraperError::BotChallenge { .. } => {
                ErrorKind::PageLoad
            }
            ScraperError::MissingStructure { .. } => ErrorKind::Element,
            ScraperError::Http(err) => {
                if err.is_timeout() {
                    ErrorKind::Timeout
                } else if err.is_connect() || err.is_request() {
                    ErrorKind::Network
                } else if err.is_status() || err.is_body() || err.is_decode() {
                    ErrorKind::PageLoad
                } else {
                    classify_message(&err.to_string())
                }
            }
            ScraperError::Script { reason } | ScraperError::Renderer(reason) => {
                classify_message(reason)
            }
            ScraperError::InvalidSiteConfig { .. } | ScraperError::Sink(_) => ErrorKind::Default,
        }
    }
}

/// Classify a free-form error message by keyword, first match wins:
/// timeout, then network, then page load, then element.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    if has(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if has(&["net::", "failed to fetch", "connection", "dns"]) {
        ErrorKind::Network
    } else if has(&["page", "load"]) {
        ErrorKind::PageLoad
    } else if has(&["element", "selector"]) {
        ErrorKind::Element
    } else {
        ErrorKind::Default
    }
}
