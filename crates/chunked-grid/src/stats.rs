//! Incrementally maintained grid statistics.
//!
//! The tracker keeps the count, sum, minimum and maximum of the finite data
//! values of a grid, plus how many cells hold the current extremes. Removing
//! the last holder of an extreme cannot be repaired locally, so the tracker
//! goes stale and must be rebuilt with a full scan.

use serde::{Deserialize, Serialize};

/// How a grid maintains its statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatisticsMode {
    /// Update on every write.
    #[default]
    Exact,
    /// Skip per-write bookkeeping; rebuild on the next exact read.
    Deferred,
}

impl StatisticsMode {
    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deferred" | "lazy" | "not_updated" => Self::Deferred,
            _ => Self::Exact,
        }
    }
}

impl std::fmt::Display for StatisticsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Neumaier-compensated running sum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompensatedSum {
    sum: f64,
    compensation: f64,
}

impl CompensatedSum {
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    pub fn sub(&mut self, value: f64) {
        self.add(-value);
    }

    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Point-in-time view of grid statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridStatistics {
    /// Number of cells holding finite data values.
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Cells currently equal to `min`.
    pub n_min: u64,
    /// Cells currently equal to `max`.
    pub n_max: u64,
    /// True when a rescan is pending. Min and max are absent, and count and
    /// sum may also be off if cells were written without bookkeeping.
    pub stale: bool,
}

impl GridStatistics {
    /// Arithmetic mean of the data values.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Running aggregates for one grid.
#[derive(Debug, Clone)]
pub struct StatisticsTracker {
    mode: StatisticsMode,
    count: u64,
    sum: CompensatedSum,
    min: f64,
    n_min: u64,
    max: f64,
    n_max: u64,
    /// Min/max unknown.
    stale: bool,
    /// Count/sum unknown too.
    untracked: bool,
}

impl StatisticsTracker {
    /// Tracker for a grid with no data.
    pub fn new(mode: StatisticsMode) -> Self {
        Self {
            mode,
            count: 0,
            sum: CompensatedSum::default(),
            min: f64::INFINITY,
            n_min: 0,
            max: f64::NEG_INFINITY,
            n_max: 0,
            stale: false,
            untracked: false,
        }
    }

    pub fn mode(&self) -> StatisticsMode {
        self.mode
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Force a rescan before the next exact read.
    ///
    /// Used when cells change without going through [`Self::record_set`].
    /// Every aggregate is untrusted until [`Self::recompute`].
    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.untracked = true;
    }

    /// Account for a cell changing from `old` to `new`.
    pub fn record_set(&mut self, old: f64, new: f64, no_data_value: f64) {
        let (old_is_data, new_is_data) = (is_data(old, no_data_value), is_data(new, no_data_value));
        if old == new || (!old_is_data && !new_is_data) || self.untracked {
            return;
        }
        if self.mode == StatisticsMode::Deferred {
            self.mark_stale();
            return;
        }
        if old_is_data {
            self.remove(old);
        }
        if new_is_data {
            self.add(new);
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum.add(value);
        if self.stale {
            return;
        }
        if value < self.min {
            self.min = value;
            self.n_min = 1;
        } else if value == self.min {
            self.n_min += 1;
        }
        if value > self.max {
            self.max = value;
            self.n_max = 1;
        } else if value == self.max {
            self.n_max += 1;
        }
    }

    fn remove(&mut self, value: f64) {
        self.count -= 1;
        self.sum.sub(value);
        if self.count == 0 {
            self.reset_extremes();
            self.sum = CompensatedSum::default();
            self.stale = false;
            return;
        }
        if self.stale {
            return;
        }
        if value == self.min {
            self.n_min -= 1;
            if self.n_min == 0 {
                self.stale = true;
            }
        }
        if value == self.max {
            self.n_max -= 1;
            if self.n_max == 0 {
                self.stale = true;
            }
        }
    }

    fn reset_extremes(&mut self) {
        self.min = f64::INFINITY;
        self.n_min = 0;
        self.max = f64::NEG_INFINITY;
        self.n_max = 0;
    }

    /// Rebuild from every cell value. Clears the stale flag.
    pub fn recompute<I>(&mut self, values: I, no_data_value: f64)
    where
        I: IntoIterator<Item = f64>,
    {
        self.count = 0;
        self.sum = CompensatedSum::default();
        self.reset_extremes();
        self.stale = false;
        self.untracked = false;
        for value in values {
            if is_data(value, no_data_value) {
                self.add(value);
            }
        }
    }

    /// Reset to a grid whose `cells` cells all hold `value`.
    pub fn reset_uniform(&mut self, value: f64, cells: u64, no_data_value: f64) {
        self.recompute(std::iter::empty(), no_data_value);
        if cells == 0 || !is_data(value, no_data_value) {
            return;
        }
        self.count = cells;
        self.sum.add(value * cells as f64);
        self.min = value;
        self.max = value;
        self.n_min = cells;
        self.n_max = cells;
    }

    /// Current aggregates; min/max may be stale (see [`GridStatistics::stale`]).
    pub fn snapshot(&self) -> GridStatistics {
        let has_extremes = self.count > 0 && !self.stale;
        GridStatistics {
            count: self.count,
            sum: self.sum.value(),
            min: has_extremes.then_some(self.min),
            max: has_extremes.then_some(self.max),
            n_min: if has_extremes { self.n_min } else { 0 },
            n_max: if has_extremes { self.n_max } else { 0 },
            stale: self.stale,
        }
    }
}

/// Whether a cell value counts towards statistics.
pub(crate) fn is_data(value: f64, no_data_value: f64) -> bool {
    value != no_data_value && value.is_finite()
}
