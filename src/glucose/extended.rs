//! Plateau and curvature analysis layered on the basic trend.
//!
//! - **Plateau**: how long glucose has been sitting flat. Walking back
//!   from the newest reading, the run continues while each sample stays
//!   within ±5 % of the run's mean and no CGM gap exceeds 13 minutes.
//! - **Curvature**: least-squares parabola `a0 + a1·t + a2·t²` with `t` in
//!   5-minute units (0 at the newest reading, negative into the past).
//!   Windows of 4+ samples up to 47 minutes back are tried; the best R²
//!   wins.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::{GlucoseSample, GlucoseStatus, calculate};

/// Half-width of the plateau band relative to the running mean.
const PLATEAU_BAND: f64 = 0.05;
/// A gap longer than this breaks the plateau run.
const PLATEAU_MAX_GAP_MINUTES: f64 = 13.0;
/// Oldest sample considered for the parabola.
const PARABOLA_MAX_MINUTES: f64 = 47.0;
/// Fewest samples for a meaningful quadratic fit.
const PARABOLA_MIN_POINTS: usize = 4;
/// Fit buffer; one-minute sensors fill at most 48 slots in 47 minutes.
const FIT_CAPACITY: usize = 64;
const MS_PER_FIVE_MINUTES: f64 = 300_000.0;

/// [`GlucoseStatus`] plus plateau and curvature figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendedGlucoseStatus {
    pub base: GlucoseStatus,
    /// Length of the current plateau in minutes.
    pub dura_isf_minutes: f64,
    /// Mean glucose over the plateau.
    pub dura_isf_average: f64,
    /// Span of the best-fitting parabola window in minutes.
    pub parabola_minutes: f64,
    /// Fitted change over the 5 minutes before the newest reading.
    pub delta_previous: f64,
    /// Fitted change over the 5 minutes after the newest reading.
    pub delta_next: f64,
    pub bg_acceleration: f64,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    /// R² of the fit.
    pub correlation: f64,
}

/// Compute [`calculate`] plus plateau and curvature over the same window.
pub fn calculate_extended(samples: &[GlucoseSample]) -> Option<ExtendedGlucoseStatus> {
    let base = calculate(samples)?;
    let valid: std::vec::Vec<&GlucoseSample> = samples.iter().filter(|s| s.is_valid()).collect();

    let (dura_isf_minutes, dura_isf_average) = plateau(&valid);
    let fit = best_parabola(&valid).unwrap_or(Fit::flat(base.glucose));

    Some(ExtendedGlucoseStatus {
        base,
        dura_isf_minutes,
        dura_isf_average,
        parabola_minutes: fit.minutes,
        delta_previous: fit.a1 - fit.a2,
        delta_next: fit.a1 + fit.a2,
        bg_acceleration: 2.0 * fit.a2,
        a0: fit.a0,
        a1: fit.a1,
        a2: fit.a2,
        correlation: fit.r2,
    })
}

// ── Plateau ───────────────────────────────────────────────────

fn plateau(valid: &[&GlucoseSample]) -> (f64, f64) {
    let Some((newest, older)) = valid.split_first() else {
        return (0.0, 0.0);
    };

    let mut sum = newest.value;
    let mut n = 1.0;
    let mut mean = sum;
    let mut minutes = 0.0;

    for sample in older {
        let age = newest.minutes_after(sample);
        if age - minutes > PLATEAU_MAX_GAP_MINUTES {
            break;
        }
        if sample.value <= mean * (1.0 - PLATEAU_BAND) || sample.value >= mean * (1.0 + PLATEAU_BAND) {
            break;
        }
        sum += sample.value;
        n += 1.0;
        mean = sum / n;
        minutes = age;
    }

    (minutes, mean)
}

// ── Parabola ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Fit {
    a0: f64,
    a1: f64,
    a2: f64,
    r2: f64,
    minutes: f64,
}

impl Fit {
    fn flat(value: f64) -> Self {
        Self {
            a0: value,
            a1: 0.0,
            a2: 0.0,
            r2: 0.0,
            minutes: 0.0,
        }
    }
}

fn best_parabola(valid: &[&GlucoseSample]) -> Option<Fit> {
    let newest = valid.first()?;
    let mut points: Vec<(f64, f64), FIT_CAPACITY> = Vec::new();
    let mut best: Option<Fit> = None;

    for sample in valid {
        let age = newest.minutes_after(sample);
        if age > PARABOLA_MAX_MINUTES {
            break;
        }
        let t = (sample.timestamp_ms - newest.timestamp_ms) as f64 / MS_PER_FIVE_MINUTES;
        if points.push((t, sample.value)).is_err() {
            break;
        }
        if points.len() < PARABOLA_MIN_POINTS {
            continue;
        }
        if let Some(mut fit) = least_squares(&points) {
            fit.minutes = age;
            if best.is_none_or(|b| fit.r2 > b.r2) {
                best = Some(fit);
            }
        }
    }

    best
}

/// Solve the 3×3 normal equations by Cramer's rule.
fn least_squares(points: &[(f64, f64)]) -> Option<Fit> {
    let (mut s0, mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut y0, mut y1, mut y2) = (0.0, 0.0, 0.0);
    for &(t, y) in points {
        let t2 = t * t;
        s0 += 1.0;
        s1 += t;
        s2 += t2;
        s3 += t2 * t;
        s4 += t2 * t2;
        y0 += y;
        y1 += t * y;
        y2 += t2 * y;
    }

    // [s4 s3 s2] [a2]   [y2]
    // [s3 s2 s1] [a1] = [y1]
    // [s2 s1 s0] [a0]   [y0]
    let d = det3([[s4, s3, s2], [s3, s2, s1], [s2, s1, s0]]);
    if d.abs() < 1e-9 {
        return None;
    }
    let a2 = det3([[y2, s3, s2], [y1, s2, s1], [y0, s1, s0]]) / d;
    let a1 = det3([[s4, y2, s2], [s3, y1, s1], [s2, y0, s0]]) / d;
    let a0 = det3([[s4, s3, y2], [s3, s2, y1], [s2, s1, y0]]) / d;

    let mean = y0 / s0;
    let (mut ss_tot, mut ss_res) = (0.0, 0.0);
    for &(t, y) in points {
        let fitted = a0 + a1 * t + a2 * t * t;
        ss_tot += (y - mean) * (y - mean);
        ss_res += (y - fitted) * (y - fitted);
    }
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res < 1e-9 {
        1.0
    } else {
        0.0
    };

    Some(Fit {
        a0,
        a1,
        a2,
        r2,
        minutes: 0.0,
    })
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
