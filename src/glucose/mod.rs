//! Glucose trend calculator.
//!
//! Turns a noisy, irregularly sampled CGM stream into rate-of-change
//! figures normalised to a 5-minute cadence.
//!
//! ```text
//!  newest ──┬── 2.5 min ──┬── 7.5 ──┬── 17.5 ──┬── 42.5 min ──▶ older
//!           │   skipped   │  last   │          │              (stop)
//!           │             │◀──── short ───────▶│◀── long ────▶│
//! ```
//!
//! Every older valid sample is paired with the newest one; its rate goes
//! into the bucket(s) matching its age. Readings below 39 mg/dL are sensor
//! artifacts and never enter the math.
//!
//! The freshness gate lives in [`TrendCalculator`], not in [`calculate`]:
//! display contexts may ask for a stale status explicitly.

pub mod extended;

use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;

pub use extended::{ExtendedGlucoseStatus, calculate_extended};

/// Readings below this value (mg/dL) are sensor artifacts.
pub const MIN_VALID_MGDL: f64 = 39.0;

/// Pairings younger than this are too close to the newest reading.
const MIN_DELTA_MINUTES: f64 = 2.5;
/// Upper (exclusive) age of the `last` bucket.
const LAST_DELTA_MINUTES: f64 = 7.5;
/// Upper (exclusive) age of the `short` bucket.
const SHORT_DELTA_MINUTES: f64 = 17.5;
/// Upper (inclusive) age of the `long` bucket; scanning stops beyond it.
pub const MAX_LONG_DELTA_MINUTES: f64 = 42.5;

const MS_PER_MINUTE: f64 = 60_000.0;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Direction hint reported by the sensor, or derived from the slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrendArrow {
    #[default]
    None,
    TripleUp,
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    TripleDown,
}

impl TrendArrow {
    /// Classify a slope given in mg/dL per minute.
    pub fn from_slope_per_minute(slope: f64) -> Self {
        if slope <= -3.5 {
            Self::DoubleDown
        } else if slope <= -2.0 {
            Self::SingleDown
        } else if slope <= -1.0 {
            Self::FortyFiveDown
        } else if slope <= 1.0 {
            Self::Flat
        } else if slope <= 2.0 {
            Self::FortyFiveUp
        } else if slope <= 3.5 {
            Self::SingleUp
        } else if slope <= 40.0 {
            Self::DoubleUp
        } else {
            Self::None
        }
    }
}

/// One CGM reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    /// Glucose in mg/dL.
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
    #[serde(default)]
    pub trend_arrow: TrendArrow,
}

impl GlucoseSample {
    pub fn new(value: f64, timestamp_ms: i64) -> Self {
        Self {
            value,
            timestamp_ms,
            trend_arrow: TrendArrow::None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value >= MIN_VALID_MGDL
    }

    /// Minutes between `self` and an older sample.
    pub(crate) fn minutes_after(&self, older: &GlucoseSample) -> f64 {
        (self.timestamp_ms - older.timestamp_ms) as f64 / MS_PER_MINUTE
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Rate-of-change summary recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseStatus {
    /// Newest valid reading (mg/dL).
    pub glucose: f64,
    /// mg/dL per 5 minutes over the most recent pairing(s).
    pub delta: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    /// Timestamp of the newest valid reading.
    pub date_ms: i64,
    pub trend: TrendArrow,
}

impl GlucoseStatus {
    /// Minutes since the newest reading, relative to `now_ms`.
    pub fn age_minutes(&self, now_ms: i64) -> f64 {
        (now_ms - self.date_ms) as f64 / MS_PER_MINUTE
    }
}

/// Arithmetic mean; `0` for an empty slice.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compute the trend over `samples` (most recent first).
///
/// Returns `None` only when there is no valid sample at all. A single valid
/// sample yields all-zero deltas.
pub fn calculate(samples: &[GlucoseSample]) -> Option<GlucoseStatus> {
    let mut valid = samples.iter().filter(|s| s.is_valid());
    let newest = valid.next()?;

    let mut last_deltas = Vec::new();
    let mut short_deltas = Vec::new();
    let mut long_deltas = Vec::new();

    for sample in valid {
        let age = newest.minutes_after(sample);
        if age > MAX_LONG_DELTA_MINUTES {
            break;
        }
        if age < MIN_DELTA_MINUTES {
            continue;
        }

        let rate_5m = (newest.value - sample.value) / age * 5.0;
        if age < SHORT_DELTA_MINUTES {
            short_deltas.push(rate_5m);
            if age < LAST_DELTA_MINUTES {
                last_deltas.push(rate_5m);
            }
        } else {
            long_deltas.push(rate_5m);
        }
    }

    let delta = if !last_deltas.is_empty() {
        average(&last_deltas)
    } else {
        average(&short_deltas)
    };

    let trend = if newest.trend_arrow != TrendArrow::None {
        newest.trend_arrow
    } else if !short_deltas.is_empty() {
        TrendArrow::from_slope_per_minute(delta / 5.0)
    } else {
        TrendArrow::None
    };

    Some(GlucoseStatus {
        glucose: newest.value,
        delta,
        short_avg_delta: average(&short_deltas),
        long_avg_delta: average(&long_deltas),
        date_ms: newest.timestamp_ms,
        trend,
    })
}

// ---------------------------------------------------------------------------
// Freshness gate
// ---------------------------------------------------------------------------

/// Applies the staleness threshold on top of [`calculate`].
#[derive(Debug, Clone, Copy)]
pub struct TrendCalculator {
    stale_after_ms: i64,
}

impl TrendCalculator {
    pub fn new(config: &SystemConfig) -> Self {
        Self::with_stale_minutes(config.glucose_stale_minutes)
    }

    pub fn with_stale_minutes(minutes: u32) -> Self {
        Self {
            stale_after_ms: i64::from(minutes) * 60_000,
        }
    }

    /// `true` when a reading taken at `date_ms` is still usable at `now_ms`.
    pub fn is_fresh(&self, date_ms: i64, now_ms: i64) -> bool {
        now_ms - date_ms <= self.stale_after_ms
    }

    /// Trend for dosing decisions. Stale data yields `None` unless
    /// `allow_stale` is set (display-only callers).
    pub fn status(
        &self,
        samples: &[GlucoseSample],
        now_ms: i64,
        allow_stale: bool,
    ) -> Option<GlucoseStatus> {
        let status = calculate(samples)?;
        if allow_stale || self.is_fresh(status.date_ms, now_ms) {
            Some(status)
        } else {
            log::debug!(
                "glucose stale: newest reading {:.1} min old",
                status.age_minutes(now_ms)
            );
            None
        }
    }

    /// Extended (plateau / curvature) variant with the same gate.
    pub fn extended_status(
        &self,
        samples: &[GlucoseSample],
        now_ms: i64,
        allow_stale: bool,
    ) -> Option<ExtendedGlucoseStatus> {
        let status = calculate_extended(samples)?;
        if allow_stale || self.is_fresh(status.base.date_ms, now_ms) {
            Some(status)
        } else {
            None
        }
    }
}
