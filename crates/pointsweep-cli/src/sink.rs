//! JSON-file campaign store.
//!
//! The file holds every campaign ever published, as a JSON array ordered by
//! `(site, siteId)`. Publishing upserts: campaigns in the batch replace
//! their previous entry and everything else is kept, so a resumed crawl that
//! skips checkpointed categories does not drop their campaigns. The file is
//! replaced atomically through a temporary sibling and a rename, all through
//! `tokio::fs`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pointsweep_core::{CampaignKey, CanonicalCampaign};
use pointsweep_scraper::{Baseline, CampaignSink, SinkError};

pub(crate) struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    async fn read_all(&self) -> Result<Vec<CanonicalCampaign>, SinkError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn write_all(&self, campaigns: &[&CanonicalCampaign]) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(campaigns)?;
        if let Some(parent) = non_empty_parent(&self.path) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

#[async_trait]
impl CampaignSink for JsonFileSink {
    async fn baseline(&self) -> Result<Baseline, SinkError> {
        let existing = self.read_all().await?;
        Ok(existing.iter().collect())
    }

    async fn publish(&self, campaigns: &[CanonicalCampaign]) -> Result<(), SinkError> {
        let existing = self.read_all().await?;
        let mut merged: BTreeMap<CampaignKey, &CanonicalCampaign> =
            existing.iter().map(|c| (c.key(), c)).collect();
        for campaign in campaigns {
            merged.insert(campaign.key(), campaign);
        }
        let ordered: Vec<&CanonicalCampaign> = merged.into_values().collect();
        self.write_all(&ordered).await?;
        tracing::debug!(
            path = %self.path.display(),
            published = campaigns.len(),
            stored = ordered.len(),
            "campaign file written"
        );
        Ok(())
    }
}
