//! Cashback extraction as an ordered chain of text strategies.
//!
//! Listing markup routinely carries decorative numbers next to the real
//! reward (struck-through previous rates, neighbouring promotions), so no
//! single pattern is reliable. Each strategy is a pure `&str -> Option<_>`
//! function; the first one to return a value wins.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use pointsweep_core::CashbackValue;
use regex::Regex;

/// Point values outside this range are usually decoration (badges, ranks,
/// member counts), not the reward itself.
const PLAUSIBLE_POINTS: RangeInclusive<u64> = 1_000..=50_000;

static PURCHASE_PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"購入(?:金)?額の\s*([0-9]+(?:\.[0-9]+)?)\s*%").expect("valid regex")
});

static POINTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9][0-9,]*)\s*(?:ちょび)?(?:pt|ポイント)").expect("valid regex")
});

static YEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9][0-9,]*)\s*円(?:分|相当)").expect("valid regex"));

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%").expect("valid regex"));

type StrategyFn = dyn Fn(&str) -> Option<CashbackValue> + Send + Sync;

struct Strategy {
    name: &'static str,
    apply: Box<StrategyFn>,
}

/// Ordered cashback strategy chain.
///
/// The default chain is, in order: purchase percentage, most frequent
/// plausible point value, explicit yen amount, first bare percentage, most
/// frequent point value of any size.
pub struct CashbackExtractor {
    strategies: Vec<Strategy>,
}

impl Default for CashbackExtractor {
    fn default() -> Self {
        let mut extractor = Self {
            strategies: Vec::new(),
        };
        extractor.push_strategy("purchase_percentage", purchase_percentage);
        extractor.push_strategy("frequent_points", |text| {
            frequent_points(text, Some(&PLAUSIBLE_POINTS))
        });
        extractor.push_strategy("yen_amount", yen_amount);
        extractor.push_strategy("leading_percentage", leading_percentage);
        extractor.push_strategy("any_points", |text| frequent_points(text, None));
        extractor
    }
}

impl CashbackExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy; it runs only when every earlier one declined.
    pub fn push_strategy<F>(&mut self, name: &'static str, strategy: F)
    where
        F: Fn(&str) -> Option<CashbackValue> + Send + Sync + 'static,
    {
        self.strategies.push(Strategy {
            name,
            apply: Box::new(strategy),
        });
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    /// Extract a cashback value from the text nearest the campaign, falling
    /// back to the wider DOM context when that text yields nothing.
    #[must_use]
    pub fn extract(&self, raw_text: &str, dom_context: &str) -> CashbackValue {
        for source in [raw_text, dom_context] {
            let text = normalize_width(source);
            if text.trim().is_empty() {
                continue;
            }
            for strategy in &self.strategies {
                if let Some(value) = (strategy.apply)(&text) {
                    tracing::trace!(
                        strategy = strategy.name,
                        value = value.display_text(),
                        "cashback extracted"
                    );
                    return value;
                }
            }
        }
        CashbackValue::unknown()
    }
}

/// Map full-width ASCII variants (`１２，８００ｐｔ`, `％`) and the
/// ideographic space to their ASCII forms.
#[must_use]
pub fn normalize_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(u32::from(c) - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// Parse a number written with optional thousands separators by removing
/// every separator, never by taking a digit prefix or suffix.
fn parse_grouped(digits: &str) -> Option<u64> {
    let stripped: String = digits.chars().filter(char::is_ascii_digit).collect();
    stripped.parse().ok()
}

fn parse_decimal(text: &str) -> Option<f64> {
    text.parse::<f64>().ok()
}

fn purchase_percentage(text: &str) -> Option<CashbackValue> {
    let caps = PURCHASE_PERCENT_RE.captures(text)?;
    CashbackValue::percentage(parse_decimal(&caps[1])?)
}

/// Most frequent point value among the candidates, tie-broken by the
/// smaller value. `range` restricts which candidates are considered.
fn frequent_points(text: &str, range: Option<&RangeInclusive<u64>>) -> Option<CashbackValue> {
    let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
    for caps in POINTS_RE.captures_iter(text) {
        let Some(value) = parse_grouped(&caps[1]) else {
            continue;
        };
        if value == 0 || range.is_some_and(|r| !r.contains(&value)) {
            continue;
        }
        *counts.entry(value).or_default() += 1;
    }

    let (value, _) = counts
        .into_iter()
        .max_by_key(|&(value, count)| (count, Reverse(value)))?;
    #[allow(clippy::cast_precision_loss)]
    CashbackValue::points(value as f64)
}

fn yen_amount(text: &str) -> Option<CashbackValue> {
    let caps = YEN_RE.captures(text)?;
    let amount = parse_grouped(&caps[1])?;
    #[allow(clippy::cast_precision_loss)]
    CashbackValue::yen(amount as f64)
}

fn leading_percentage(text: &str) -> Option<CashbackValue> {
    let caps = PERCENT_RE.captures(text)?;
    CashbackValue::percentage(parse_decimal(&caps[1])?)
}

#[cfg(test)]
#[path = "cashback_test.rs"]
mod tests;
