//! Rendered-DOM access behind a small async contract.
//!
//! A [`PageRenderer`] is one live page: a headless browser tab (with the
//! `browser` feature), or a plain HTTP fetcher for sites that need no
//! scripting. A [`RendererFactory`] launches fresh
//! renderers, which is how the retry layer performs a "browser restart".

#[cfg(feature = "browser")]
mod browser;
mod http;

use async_trait::async_trait;

use crate::error::ScraperError;

#[cfg(feature = "browser")]
pub use browser::{BrowserRenderer, BrowserRendererFactory};
pub use http::{HttpRenderer, HttpRendererFactory};

/// Outcome of one navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
}

impl Navigation {
    #[must_use]
    pub fn is_error_status(&self) -> bool {
        self.status >= 400
    }
}

#[async_trait]
pub trait PageRenderer: Send {
    /// Load `url`, failing with a timeout error after `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<Navigation, ScraperError>;

    /// Run a script against the live page and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, ScraperError>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> Result<String, ScraperError>;

    async fn close(&mut self) -> Result<(), ScraperError>;
}

#[async_trait]
pub trait RendererFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageRenderer>, ScraperError>;
}

/// The single render context owned by a pipeline run.
///
/// Launches lazily on first use; [`RenderSession::restart`] disposes the
/// current renderer and launches a replacement.
pub struct RenderSession<'f> {
    factory: &'f dyn RendererFactory,
    current: Option<Box<dyn PageRenderer>>,
    launches: u32,
}

impl<'f> RenderSession<'f> {
    #[must_use]
    pub fn new(factory: &'f dyn RendererFactory) -> Self {
        Self {
            factory,
            current: None,
            launches: 0,
        }
    }

    /// The live renderer, launching one if none is running.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if a renderer cannot be launched.
    pub async fn renderer(&mut self) -> Result<&mut dyn PageRenderer, ScraperError> {
        if self.current.is_none() {
            let renderer = self.factory.launch().await?;
            self.launches += 1;
            self.current = Some(renderer);
        }
        match self.current.as_deref_mut() {
            Some(renderer) => Ok(renderer),
            None => Err(ScraperError::Renderer(
                "render session has no renderer".to_string(),
            )),
        }
    }

    /// Dispose the current renderer and launch a fresh one.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the replacement cannot be launched.
    pub async fn restart(&mut self) -> Result<(), ScraperError> {
        tracing::warn!(launches = self.launches, "restarting render context");
        self.close().await;
        self.renderer().await.map(|_| ())
    }

    /// Release the current renderer, if any. Close failures are logged, not
    /// returned: nothing useful can be done with them.
    pub async fn close(&mut self) {
        if let Some(mut renderer) = self.current.take() {
            if let Err(e) = renderer.close().await {
                tracing::warn!(error = %e, "failed to close renderer");
            }
        }
    }

    /// Number of renderers launched over this session's lifetime.
    #[must_use]
    pub fn launches(&self) -> u32 {
        self.launches
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }
}
