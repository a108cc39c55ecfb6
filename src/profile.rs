//! Basal profile: the scheduled rates constraint sources scale from.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

const MINUTES_PER_DAY: i64 = 24 * 60;
const MS_PER_DAY: i64 = MINUTES_PER_DAY * 60_000;

/// A basal rate that takes effect at `start_minute` (local time) and runs
/// until the next block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasalBlock {
    /// Minutes after local midnight.
    pub start_minute: u16,
    pub rate_u_per_h: f64,
}

/// Active therapy profile. Only the basal schedule is consulted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Sorted by `start_minute`, first block at minute 0.
    pub basal: Vec<BasalBlock>,
}

impl Profile {
    /// One rate for the whole day.
    pub fn flat(name: impl Into<String>, rate_u_per_h: f64) -> Self {
        Self {
            name: name.into(),
            basal: vec![BasalBlock {
                start_minute: 0,
                rate_u_per_h,
            }],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.basal.first() {
            None => return Err(ConfigError::ValidationFailed("profile has no basal blocks")),
            Some(b) if b.start_minute != 0 => {
                return Err(ConfigError::ValidationFailed(
                    "first basal block must start at midnight",
                ));
            }
            Some(_) => {}
        }
        if self
            .basal
            .windows(2)
            .any(|w| w[1].start_minute <= w[0].start_minute)
        {
            return Err(ConfigError::ValidationFailed(
                "basal blocks must be strictly ordered",
            ));
        }
        if self
            .basal
            .iter()
            .any(|b| i64::from(b.start_minute) >= MINUTES_PER_DAY || b.rate_u_per_h.is_nan()
                || b.rate_u_per_h < 0.0)
        {
            return Err(ConfigError::ValidationFailed(
                "basal block out of range",
            ));
        }
        Ok(())
    }

    /// Rate in effect at `minute` after local midnight.
    pub fn basal_at_minute(&self, minute: u16) -> f64 {
        self.basal
            .iter()
            .take_while(|b| b.start_minute <= minute)
            .last()
            .or(self.basal.first())
            .map_or(0.0, |b| b.rate_u_per_h)
    }

    /// Rate in effect at an absolute instant.
    pub fn basal_at(&self, epoch_ms: i64, utc_offset_ms: i64) -> f64 {
        let local_ms = (epoch_ms + utc_offset_ms).rem_euclid(MS_PER_DAY);
        self.basal_at_minute((local_ms / 60_000) as u16)
    }

    /// Highest scheduled rate of the day.
    pub fn max_daily_basal(&self) -> f64 {
        self.basal
            .iter()
            .map(|b| b.rate_u_per_h)
            .fold(0.0, f64::max)
    }
}
