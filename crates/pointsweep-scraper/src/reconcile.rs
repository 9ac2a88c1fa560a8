//! Merge campaign stubs into one canonical record per `(site, site_id)`.
//!
//! Later observations overwrite title, cashback, category and url; platform
//! hints accumulate. Change status is settled against the prior-run
//! [`Baseline`] when the run finishes, so a campaign seen on several pages
//! is compared once using its final content hash.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pointsweep_core::{CampaignKey, CampaignStub, CanonicalCampaign, ChangeStatus};
use serde::Serialize;

use crate::sink::Baseline;

/// Counts against the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Baseline keys of fully crawled sites that were not observed this run.
    /// Reported only; nothing is deleted.
    pub missing: Vec<CampaignKey>,
}

#[derive(Debug, Clone)]
pub struct ReconciledDataset {
    /// One entry per campaign key, ordered by key.
    pub campaigns: Vec<CanonicalCampaign>,
    pub summary: ChangeSummary,
}

pub struct Reconciler<'b> {
    baseline: &'b Baseline,
    points_per_yen: HashMap<String, f64>,
    complete_sites: BTreeSet<String>,
    campaigns: BTreeMap<CampaignKey, CanonicalCampaign>,
}

impl<'b> Reconciler<'b> {
    #[must_use]
    pub fn new(baseline: &'b Baseline) -> Self {
        Self {
            baseline,
            points_per_yen: HashMap::new(),
            complete_sites: BTreeSet::new(),
            campaigns: BTreeMap::new(),
        }
    }

    /// Conversion rate used for `yen_equivalent` on `site`'s campaigns.
    #[must_use]
    pub fn with_points_per_yen(mut self, site: impl Into<String>, rate: f64) -> Self {
        self.points_per_yen.insert(site.into(), rate);
        self
    }

    /// Every category of `site` ran to completion this run, so baseline
    /// entries for it that were never observed can be reported as missing.
    pub fn mark_site_complete(&mut self, site: impl Into<String>) {
        self.complete_sites.insert(site.into());
    }

    /// Fold one page's (or one category's) stubs into the map, in order.
    pub fn ingest(&mut self, stubs: impl IntoIterator<Item = CampaignStub>) {
        for stub in stubs {
            match self.campaigns.get_mut(&stub.key()) {
                Some(existing) => existing.absorb(stub),
                None => {
                    let campaign = CanonicalCampaign::from_stub(stub);
                    self.campaigns.insert(campaign.key(), campaign);
                }
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &CampaignKey) -> Option<&CanonicalCampaign> {
        self.campaigns.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Settle change status and yen equivalents, and produce the dataset.
    #[must_use]
    pub fn finish(self) -> ReconciledDataset {
        let mut missing: Vec<CampaignKey> = self
            .baseline
            .keys()
            .filter(|key| self.complete_sites.contains(&key.site))
            .filter(|key| !self.campaigns.contains_key(*key))
            .cloned()
            .collect();
        missing.sort();
        let mut summary = ChangeSummary {
            missing,
            ..ChangeSummary::default()
        };

        let mut campaigns = Vec::with_capacity(self.campaigns.len());
        for (key, mut campaign) in self.campaigns {
            campaign.change = match self.baseline.hash(&key) {
                None => ChangeStatus::New,
                Some(hash) if hash == campaign.content_hash => ChangeStatus::Unchanged,
                Some(_) => ChangeStatus::Changed,
            };
            match campaign.change {
                ChangeStatus::New => summary.new += 1,
                ChangeStatus::Changed => summary.changed += 1,
                ChangeStatus::Unchanged => summary.unchanged += 1,
            }
            campaign.yen_equivalent = campaign
                .cashback
                .yen_equivalent(self.points_per_yen.get(&campaign.site).copied());
            campaigns.push(campaign);
        }

        ReconciledDataset { campaigns, summary }
    }
}

/// Reconcile a stream of per-page stub batches against `baseline`.
#[must_use]
pub fn reconcile<I>(pages: I, baseline: &Baseline) -> BTreeMap<CampaignKey, CanonicalCampaign>
where
    I: IntoIterator<Item = Vec<CampaignStub>>,
{
    let mut reconciler = Reconciler::new(baseline);
    for page in pages {
        reconciler.ingest(page);
    }
    reconciler
        .finish()
        .campaigns
        .into_iter()
        .map(|c| (c.key(), c))
        .collect()
}
