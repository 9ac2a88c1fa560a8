//! Two-level retry: per-unit policies keyed by error class, then a run-wide
//! escalation when too many units exhaust their retries.
//!
//! A "unit" is one category traversal or one detail-page fetch, identified by
//! a caller-chosen string. Callers drive the loop themselves:
//!
//! 1. run the unit;
//! 2. on error, ask [`RetryManager::should_retry`];
//! 3. on [`RetryDecision::Retry`], call [`RetryManager::apply`] and go again;
//! 4. on [`RetryDecision::GiveUp`], call [`RetryManager::record_exhausted`].
//!
//! Once every unit has run, [`RetryManager::global_decision`] says whether the
//! failed subset should be re-run.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;

use crate::error::{ErrorKind, ScraperError};
use crate::renderer::RenderSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Retry straight away.
    Immediate,
    /// Sleep `wait_ms` (with jitter), then retry in the same render context.
    Wait,
    /// Dispose and relaunch the render context, then retry.
    BrowserRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait_ms: u64,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, wait_ms: u64, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            wait_ms,
            strategy,
        }
    }
}

/// Policy per error class.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub timeout: RetryPolicy,
    pub network: RetryPolicy,
    pub page_load: RetryPolicy,
    pub element: RetryPolicy,
    pub default: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            timeout: RetryPolicy::new(3, 3_000, RetryStrategy::Immediate),
            network: RetryPolicy::new(3, 5_000, RetryStrategy::Wait),
            page_load: RetryPolicy::new(2, 2_000, RetryStrategy::BrowserRestart),
            element: RetryPolicy::new(2, 1_000, RetryStrategy::Immediate),
            default: RetryPolicy::new(1, 2_000, RetryStrategy::Immediate),
        }
    }
}

impl RetryPolicies {
    #[must_use]
    pub fn for_kind(&self, kind: ErrorKind) -> RetryPolicy {
        match kind {
            ErrorKind::Timeout => self.timeout,
            ErrorKind::Network => self.network,
            ErrorKind::PageLoad => self.page_load,
            ErrorKind::Element => self.element,
            ErrorKind::Default => self.default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the unit again after applying `policy.strategy`. `attempt` is the
    /// 1-based retry number.
    Retry {
        kind: ErrorKind,
        attempt: u32,
        policy: RetryPolicy,
    },
    /// The unit's retry budget for this error class is spent.
    GiveUp { kind: ErrorKind, retries: u32 },
}

/// A unit that exhausted its retries.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub kind: ErrorKind,
    pub retries: u32,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobalRetryDecision {
    /// Failures stayed below the escalation threshold.
    Healthy { failure_rate: f64 },
    /// Re-run the failed units; `round` is the 1-based global retry number.
    Retry { failure_rate: f64, round: u32 },
    /// Threshold met with no global retries left.
    Degraded { failure_rate: f64 },
}

pub struct RetryManager {
    policies: RetryPolicies,
    global_threshold: f64,
    max_global_retries: u32,
    global_retries: u32,
    degraded: bool,
    retry_counts: HashMap<String, u32>,
    failures: BTreeMap<String, UnitFailure>,
}

impl RetryManager {
    #[must_use]
    pub fn new(policies: RetryPolicies, global_threshold: f64, max_global_retries: u32) -> Self {
        Self {
            policies,
            global_threshold,
            max_global_retries,
            global_retries: 0,
            degraded: false,
            retry_counts: HashMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Classify `err` and decide whether `unit` gets another attempt.
    ///
    /// A `Retry` decision consumes one retry from the unit's budget.
    pub fn should_retry(&mut self, unit: &str, err: &ScraperError) -> RetryDecision {
        let kind = err.kind();
        let policy = self.policies.for_kind(kind);
        let count = self.retry_counts.entry(unit.to_string()).or_insert(0);

        if *count < policy.max_retries {
            *count += 1;
            tracing::warn!(
                unit,
                kind = %kind,
                attempt = *count,
                max_retries = policy.max_retries,
                strategy = ?policy.strategy,
                error = %err,
                "unit failed, retrying"
            );
            RetryDecision::Retry {
                kind,
                attempt: *count,
                policy,
            }
        } else {
            tracing::warn!(
                unit,
                kind = %kind,
                retries = *count,
                error = %err,
                "unit failed, retries exhausted"
            );
            RetryDecision::GiveUp {
                kind,
                retries: *count,
            }
        }
    }

    /// Carry out a retry policy's strategy before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns the launch error if a browser restart cannot bring up a new
    /// render context.
    pub async fn apply(
        &self,
        policy: RetryPolicy,
        session: &mut RenderSession<'_>,
    ) -> Result<(), ScraperError> {
        match policy.strategy {
            RetryStrategy::Immediate => {}
            RetryStrategy::Wait => {
                tokio::time::sleep(Duration::from_millis(jittered(policy.wait_ms))).await;
            }
            RetryStrategy::BrowserRestart => {
                session.restart().await?;
                if policy.wait_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(policy.wait_ms)).await;
                }
            }
        }
        Ok(())
    }

    /// Record that `unit` gave up with `err`.
    pub fn record_exhausted(&mut self, unit: &str, kind: ErrorKind, retries: u32, err: &ScraperError) {
        self.failures.insert(
            unit.to_string(),
            UnitFailure {
                unit: unit.to_string(),
                kind,
                retries,
                error: err.to_string(),
            },
        );
    }

    /// Retries consumed by `unit` so far.
    #[must_use]
    pub fn retries(&self, unit: &str) -> u32 {
        self.retry_counts.get(unit).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn failure(&self, unit: &str) -> Option<&UnitFailure> {
        self.failures.get(unit)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitFailure> {
        self.failures.values()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn global_retries(&self) -> u32 {
        self.global_retries
    }

    /// Whether a global decision has come out `Degraded`.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Decide on escalation given the number of units in the run. A
    /// `Retry` decision consumes one global retry.
    pub fn global_decision(&mut self, total_units: usize) -> GlobalRetryDecision {
        if total_units == 0 || self.failures.is_empty() {
            return GlobalRetryDecision::Healthy { failure_rate: 0.0 };
        }

        #[allow(clippy::cast_precision_loss)]
        let failure_rate = self.failures.len() as f64 / total_units as f64;
        if failure_rate < self.global_threshold {
            return GlobalRetryDecision::Healthy { failure_rate };
        }

        if self.global_retries < self.max_global_retries {
            self.global_retries += 1;
            tracing::warn!(
                failure_rate,
                failed = self.failures.len(),
                total_units,
                round = self.global_retries,
                "failure rate over threshold, retrying failed units"
            );
            GlobalRetryDecision::Retry {
                failure_rate,
                round: self.global_retries,
            }
        } else {
            self.degraded = true;
            GlobalRetryDecision::Degraded { failure_rate }
        }
    }

    /// Clear failure and retry state for every failed unit and return their
    /// ids, so they can be run again from scratch.
    pub fn reset_failed(&mut self) -> Vec<String> {
        let failed: Vec<String> = self.failures.keys().cloned().collect();
        for unit in &failed {
            self.retry_counts.remove(unit);
        }
        self.failures.clear();
        failed
    }
}

/// `base_ms` spread by ±25 %.
fn jittered(base_ms: u64) -> u64 {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (base_ms as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    delay_ms
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
