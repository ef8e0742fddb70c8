//! GraphQL cost budget telemetry and batch sizing.
//!
//! The Admin GraphQL API meters queries against a leaky bucket: each account
//! has `maximumAvailable` points that refill at `restoreRate` points per
//! second. Batch sizes here are derived from the most recent measured cost so
//! the next augmentation call lands near the full budget without probing
//! every tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cost telemetry from a successful GraphQL call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredCost {
    pub actual_cost: u32,
    pub max_cost: u32,
}

/// Current budget headroom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub available: u32,
    pub maximum: u32,
    /// Points restored per second, when the API reported it.
    pub restore_rate: Option<f64>,
}

impl Budget {
    pub fn new(available: u32, maximum: u32) -> Self {
        Self {
            available,
            maximum,
            restore_rate: None,
        }
    }

    #[must_use]
    pub fn with_restore_rate(mut self, restore_rate: f64) -> Self {
        self.restore_rate = Some(restore_rate);
        self
    }

    /// Headroom required before a job's first augmentation call.
    #[inline]
    pub fn admission_floor(&self) -> u32 {
        self.maximum.saturating_sub(1)
    }
}

/// Tunables for batch sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSizing {
    /// Size used before any cost telemetry exists.
    pub default_batch_size: usize,
    /// Hard ceiling for any batch (the GraphQL `nodes` page-size limit).
    pub max_batch_size: usize,
    /// Safety margin applied when shrinking after a cost overrun.
    pub recovery_factor: f64,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            recovery_factor: DEFAULT_RECOVERY_FACTOR,
        }
    }
}

/// Batch size before any telemetry is available.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Upper bound on ids per augmentation request.
pub const MAX_BATCH_SIZE: usize = 250;

/// Margin applied to the recovery size after a cost overrun.
pub const DEFAULT_RECOVERY_FACTOR: f64 = 0.75;

/// Fallback refill rate (points per second) when the API omits it.
pub const DEFAULT_RESTORE_RATE: f64 = 50.0;

impl BatchSizing {
    #[inline]
    fn clamp(&self, size: f64) -> usize {
        let upper = self.max_batch_size.max(1);
        if !size.is_finite() || size >= upper as f64 {
            return upper;
        }
        (size.floor() as usize).clamp(1, upper)
    }

    /// Size for the next augmentation batch.
    ///
    /// A forced size from a prior overrun wins outright. Otherwise the last
    /// batch size is scaled by `maximum / actual_cost`; the maximum comes from
    /// `budget` when fresh headroom is known, else from the last measurement.
    /// Without telemetry the default size is used.
    pub fn next_batch_size(
        &self,
        forced: Option<usize>,
        last_cost: Option<MeasuredCost>,
        last_size: Option<usize>,
        budget: Option<&Budget>,
    ) -> usize {
        if let Some(forced) = forced {
            return forced.clamp(1, self.max_batch_size.max(1));
        }

        match (last_cost, last_size) {
            (Some(cost), Some(size)) if size > 0 => {
                if cost.actual_cost == 0 {
                    return self.max_batch_size.max(1);
                }
                let maximum = budget.map_or(cost.max_cost, |b| b.maximum);
                self.clamp(size as f64 * (f64::from(maximum) / f64::from(cost.actual_cost)))
            }
            _ => self.default_batch_size.clamp(1, self.max_batch_size.max(1)),
        }
    }

    /// Forced size after a cost overrun on a batch of `last_size` rows.
    ///
    /// `floor((max_cost / actual_cost) * last_size * recovery_factor)`, kept
    /// strictly below `last_size` whenever `last_size > 1`.
    pub fn recovery_batch_size(&self, actual_cost: u32, max_cost: u32, last_size: usize) -> usize {
        let last_size = last_size.max(1);
        let scaled = if actual_cost == 0 {
            last_size as f64 * self.recovery_factor
        } else {
            (f64::from(max_cost) / f64::from(actual_cost)) * last_size as f64 * self.recovery_factor
        };
        let size = self.clamp(scaled);
        if last_size > 1 {
            size.min(last_size - 1)
        } else {
            1
        }
    }
}

/// Outcome of the pre-tick budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Proceed,
    Defer(Deferral),
}

/// Caller-facing hint to wait before the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferral {
    pub retry_after: Duration,
    pub not_before: DateTime<Utc>,
}

impl Deferral {
    pub fn after(retry_after: Duration) -> Self {
        let not_before = chrono::Duration::from_std(retry_after)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        Self {
            retry_after,
            not_before,
        }
    }
}

/// Decide whether a job's first tick may spend budget.
///
/// Work is deferred while headroom sits below [`Budget::admission_floor`];
/// the hint is the time needed to refill the gap at the restore rate.
pub fn admit(budget: &Budget, default_restore_rate: f64) -> Admission {
    let floor = budget.admission_floor();
    if budget.available >= floor {
        return Admission::Proceed;
    }

    let rate = budget
        .restore_rate
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(default_restore_rate.max(1.0));
    let secs = (f64::from(floor - budget.available) / rate).ceil().max(1.0);
    Admission::Defer(Deferral::after(Duration::from_secs(secs as u64)))
}
