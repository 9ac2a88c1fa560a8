use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Device platform a campaign is advertised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
    Unknown,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
            Platform::Web => write!(f, "web"),
            Platform::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashbackKind {
    Percentage,
    Points,
    Yen,
    Unknown,
}

/// A normalized reward: a percentage of the purchase amount, a point count,
/// or a yen amount.
///
/// `amount` is `None` exactly when `kind` is [`CashbackKind::Unknown`] and is
/// never negative. Values can only be built through the constructors, which
/// reject negative and non-finite amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredCashbackValue")]
pub struct CashbackValue {
    kind: CashbackKind,
    amount: Option<f64>,
    display_text: String,
}

/// Deserialized form of [`CashbackValue`]. Loading goes back through the
/// constructors, so `displayText` is re-derived rather than trusted.
#[derive(Deserialize)]
struct StoredCashbackValue {
    kind: CashbackKind,
    amount: Option<f64>,
}

impl TryFrom<StoredCashbackValue> for CashbackValue {
    type Error = String;

    fn try_from(stored: StoredCashbackValue) -> Result<Self, Self::Error> {
        let value = match (stored.kind, stored.amount) {
            (CashbackKind::Unknown, None) => return Ok(Self::unknown()),
            (CashbackKind::Unknown, Some(_)) => {
                return Err("unknown cashback must not carry an amount".to_string())
            }
            (kind, None) => return Err(format!("{kind:?} cashback is missing its amount")),
            (CashbackKind::Percentage, Some(amount)) => Self::percentage(amount),
            (CashbackKind::Points, Some(amount)) => Self::points(amount),
            (CashbackKind::Yen, Some(amount)) => Self::yen(amount),
        };
        value.ok_or_else(|| "cashback amount must be finite and not negative".to_string())
    }
}

impl CashbackValue {
    #[must_use]
    pub fn percentage(amount: f64) -> Option<Self> {
        Self::known(CashbackKind::Percentage, amount, "%")
    }

    #[must_use]
    pub fn points(amount: f64) -> Option<Self> {
        Self::known(CashbackKind::Points, amount, "pt")
    }

    #[must_use]
    pub fn yen(amount: f64) -> Option<Self> {
        Self::known(CashbackKind::Yen, amount, "円")
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self {
            kind: CashbackKind::Unknown,
            amount: None,
            display_text: "unknown".to_string(),
        }
    }

    fn known(kind: CashbackKind, amount: f64, suffix: &str) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        Some(Self {
            kind,
            amount: Some(amount),
            // f64's Display drops a zero fraction: 12800.0 renders as "12800".
            display_text: format!("{amount}{suffix}"),
        })
    }

    #[must_use]
    pub fn kind(&self) -> CashbackKind {
        self.kind
    }

    #[must_use]
    pub fn amount(&self) -> Option<f64> {
        self.amount
    }

    /// Canonical rendering, e.g. `"12800pt"`, `"1.5%"`, `"500円"`.
    #[must_use]
    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.kind == CashbackKind::Unknown
    }

    /// Yen value of this reward under a site-supplied conversion rate.
    ///
    /// Returns `None` without a rate: point values are never converted using
    /// an assumed rate. Percentages have no fixed yen value.
    #[must_use]
    pub fn yen_equivalent(&self, points_per_yen: Option<f64>) -> Option<f64> {
        let rate = points_per_yen.filter(|r| *r > 0.0)?;
        match (self.kind, self.amount) {
            (CashbackKind::Points, Some(points)) => Some(points / rate),
            (CashbackKind::Yen, Some(yen)) => Some(yen),
            _ => None,
        }
    }
}

/// Identity of a campaign: the site-assigned id is only unique within its site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignKey {
    pub site: String,
    pub site_id: String,
}

impl CampaignKey {
    #[must_use]
    pub fn new(site: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            site_id: site_id.into(),
        }
    }
}

impl std::fmt::Display for CampaignKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.site, self.site_id)
    }
}

/// One observation of a campaign on one page visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStub {
    pub site: String,
    pub site_id: String,
    /// Whitespace-normalized title text.
    pub title: String,
    pub url: String,
    pub raw_cashback_text: String,
    pub cashback: CashbackValue,
    pub platform_hint: Platform,
    pub category: String,
    pub observed_at: DateTime<Utc>,
}

impl CampaignStub {
    #[must_use]
    pub fn key(&self) -> CampaignKey {
        CampaignKey::new(self.site.clone(), self.site_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Not present in the baseline.
    New,
    /// Present in the baseline under a different content hash.
    Changed,
    Unchanged,
}

/// The merged, deduplicated record for one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCampaign {
    pub site: String,
    pub site_id: String,
    pub title: String,
    pub url: String,
    pub cashback: CashbackValue,
    /// Union of every platform hint observed for this id.
    pub platforms: BTreeSet<Platform>,
    pub category: String,
    pub content_hash: String,
    pub last_seen_at: DateTime<Utc>,
    pub change: ChangeStatus,
    /// Present only when the site publishes a points-to-yen rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yen_equivalent: Option<f64>,
}

impl CanonicalCampaign {
    /// Seed a record from its first observation. The change status starts as
    /// `New` and is settled against the baseline once the run is complete.
    #[must_use]
    pub fn from_stub(stub: CampaignStub) -> Self {
        let platforms = BTreeSet::from([stub.platform_hint]);
        let content_hash = content_hash(&stub.title, &stub.cashback, &platforms);
        Self {
            site: stub.site,
            site_id: stub.site_id,
            title: stub.title,
            url: stub.url,
            cashback: stub.cashback,
            platforms,
            category: stub.category,
            content_hash,
            last_seen_at: stub.observed_at,
            change: ChangeStatus::New,
            yen_equivalent: None,
        }
    }

    /// Fold a later observation into this record.
    ///
    /// Title, cashback, category and url take the newest observation's
    /// values, judged by `observed_at`; ties go to the stub absorbed last.
    /// An older stub only contributes its platform. The content hash is
    /// recomputed.
    pub fn absorb(&mut self, stub: CampaignStub) {
        self.platforms.insert(stub.platform_hint);
        if stub.observed_at >= self.last_seen_at {
            self.title = stub.title;
            self.url = stub.url;
            self.cashback = stub.cashback;
            self.category = stub.category;
            self.last_seen_at = stub.observed_at;
        }
        self.content_hash = content_hash(&self.title, &self.cashback, &self.platforms);
    }

    #[must_use]
    pub fn key(&self) -> CampaignKey {
        CampaignKey::new(self.site.clone(), self.site_id.clone())
    }
}

/// SHA-256 hex digest over the fields that make a campaign "different" to a
/// reader: title, cashback rendering and the platform set.
///
/// Observation time, url and category are not hashed.
#[must_use]
pub fn content_hash(title: &str, cashback: &CashbackValue, platforms: &BTreeSet<Platform>) -> String {
    let platforms = platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let input = format!("{title}\u{0}{}\u{0}{platforms}", cashback.display_text());
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
