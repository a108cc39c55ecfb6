//! System configuration parameters
//!
//! All user preferences consumed by the constraint sources and the
//! operating-mode controller. Values can be overridden through a
//! [`ConfigPort`](crate::app::ports::ConfigPort) implementation; every
//! save goes through [`validate_config`] first.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Patient age profile selecting the hard-limit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgeProfile {
    Child,
    Teenage,
    #[default]
    Adult,
    ResistantAdult,
    Pregnant,
}

/// Loop mode selected in preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApsMode {
    /// Suggestions only; every change must be enacted manually.
    #[default]
    Open,
    /// Fully automated temporary basal and SMB delivery.
    Closed,
    /// Closed loop restricted to low-glucose suspend (max IOB forced to 0).
    Lgs,
}

/// Core system configuration. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Patient ---
    pub age: AgeProfile,
    pub aps_mode: ApsMode,

    // --- Dosing preferences (each is one candidate for one constraint) ---
    /// Largest single bolus in units.
    pub max_bolus_u: f64,
    /// Absolute temporary basal ceiling in U/h.
    pub max_basal_u_per_h: f64,
    /// Ceiling as a multiple of the profile basal currently in effect.
    pub max_basal_multiplier: f64,
    /// Ceiling as a multiple of the highest basal rate of the day.
    pub max_daily_basal_multiplier: f64,
    /// Maximum insulin on board the algorithm may target, in units.
    pub max_iob_u: f64,
    /// Largest carb entry accepted, in grams.
    pub max_carbs_g: i32,
    pub smb_enabled: bool,
    pub autosens_enabled: bool,

    // --- Timing ---
    /// Glucose older than this is treated as stale by the loop.
    pub glucose_stale_minutes: u32,
    /// Shortest accepted planned duration for a temporary mode.
    pub min_temporary_minutes: u32,
    /// Duration used when the loop forces SuspendedByPump.
    pub pump_suspend_reissue_minutes: u32,
    /// Control loop period.
    pub loop_interval_secs: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            age: AgeProfile::Adult,
            aps_mode: ApsMode::Open,

            max_bolus_u: 3.0,
            max_basal_u_per_h: 1.0,
            max_basal_multiplier: 4.0,
            max_daily_basal_multiplier: 3.0,
            max_iob_u: 1.5,
            max_carbs_g: 48,
            smb_enabled: false,
            autosens_enabled: false,

            glucose_stale_minutes: 7,
            min_temporary_minutes: 5,
            pump_suspend_reissue_minutes: 60,
            loop_interval_secs: 300, // 5 min
        }
    }
}

/// Range-check every preference. Invalid values are rejected, never clamped.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&cfg.max_bolus_u) {
        return Err(ConfigError::ValidationFailed("max_bolus_u must be 0–100"));
    }
    if !(0.0..=50.0).contains(&cfg.max_basal_u_per_h) {
        return Err(ConfigError::ValidationFailed(
            "max_basal_u_per_h must be 0–50",
        ));
    }
    if !(1.0..=10.0).contains(&cfg.max_basal_multiplier) {
        return Err(ConfigError::ValidationFailed(
            "max_basal_multiplier must be 1–10",
        ));
    }
    if !(1.0..=10.0).contains(&cfg.max_daily_basal_multiplier) {
        return Err(ConfigError::ValidationFailed(
            "max_daily_basal_multiplier must be 1–10",
        ));
    }
    if !(0.0..=100.0).contains(&cfg.max_iob_u) {
        return Err(ConfigError::ValidationFailed("max_iob_u must be 0–100"));
    }
    if !(0..=500).contains(&cfg.max_carbs_g) {
        return Err(ConfigError::ValidationFailed("max_carbs_g must be 0–500"));
    }
    if !(1..=60).contains(&cfg.glucose_stale_minutes) {
        return Err(ConfigError::ValidationFailed(
            "glucose_stale_minutes must be 1–60",
        ));
    }
    if cfg.min_temporary_minutes == 0 {
        return Err(ConfigError::ValidationFailed(
            "min_temporary_minutes must be > 0",
        ));
    }
    if cfg.pump_suspend_reissue_minutes <= cfg.min_temporary_minutes {
        return Err(ConfigError::ValidationFailed(
            "pump_suspend_reissue_minutes must exceed min_temporary_minutes",
        ));
    }
    if !(10..=900).contains(&cfg.loop_interval_secs) {
        return Err(ConfigError::ValidationFailed(
            "loop_interval_secs must be 10–900",
        ));
    }
    Ok(())
}
