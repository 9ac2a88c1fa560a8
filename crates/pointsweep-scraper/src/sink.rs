//! Where canonical campaigns go, and where the prior-run baseline comes from.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pointsweep_core::{CampaignKey, CanonicalCampaign};

use crate::error::SinkError;

/// Content hashes from the previous published run, keyed by campaign.
/// Read-only input to reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    hashes: HashMap<CampaignKey, String>,
}

impl Baseline {
    #[must_use]
    pub fn hash(&self, key: &CampaignKey) -> Option<&str> {
        self.hashes.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CampaignKey> {
        self.hashes.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl FromIterator<(CampaignKey, String)> for Baseline {
    fn from_iter<I: IntoIterator<Item = (CampaignKey, String)>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a CanonicalCampaign> for Baseline {
    fn from_iter<I: IntoIterator<Item = &'a CanonicalCampaign>>(iter: I) -> Self {
        iter.into_iter()
            .map(|c| (c.key(), c.content_hash.clone()))
            .collect()
    }
}

#[async_trait]
pub trait CampaignSink: Send + Sync {
    /// Content hashes of the last published batch.
    async fn baseline(&self) -> Result<Baseline, SinkError>;

    /// Accept a batch with exactly one entry per campaign key.
    async fn publish(&self, campaigns: &[CanonicalCampaign]) -> Result<(), SinkError>;
}

/// Keeps the last published batch in memory; its baseline is that batch.
#[derive(Debug, Default)]
pub struct MemorySink {
    published: Mutex<Vec<CanonicalCampaign>>,
}

impl MemorySink {
    #[must_use]
    pub fn with_campaigns(campaigns: Vec<CanonicalCampaign>) -> Self {
        Self {
            published: Mutex::new(campaigns),
        }
    }

    /// Snapshot of the last published batch.
    #[must_use]
    pub fn published(&self) -> Vec<CanonicalCampaign> {
        self.published
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CampaignSink for MemorySink {
    async fn baseline(&self) -> Result<Baseline, SinkError> {
        let guard = self.published.lock().map_err(|_| SinkError::Poisoned)?;
        Ok(guard.iter().collect())
    }

    async fn publish(&self, campaigns: &[CanonicalCampaign]) -> Result<(), SinkError> {
        let mut guard = self.published.lock().map_err(|_| SinkError::Poisoned)?;
        *guard = campaigns.to_vec();
        Ok(())
    }
}
