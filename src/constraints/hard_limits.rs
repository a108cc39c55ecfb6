//! Age-based absolute ceilings.
//!
//! These are the last line of defence: no preference, profile or pump
//! report can raise a bound above its hard limit. The table is compiled
//! in and selected by [`AgeProfile`].

use crate::config::AgeProfile;

use super::{Constraint, ConstraintContext, ConstraintSource, CountLimit, RateLimit};

pub const NAME: &str = "hard-limits";

/// Largest carb entry accepted for any age profile, in grams.
pub const MAX_CARBS_G: i32 = 300;
/// Largest temporary basal as a percentage of the profile basal.
pub const MAX_BASAL_PERCENT: i32 = 500;

/// One row of the hard-limit table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeLimits {
    pub max_bolus_u: f64,
    pub max_basal_u_per_h: f64,
    /// Max IOB with the classic (AMA) algorithm.
    pub max_iob_ama_u: f64,
    /// Max IOB when SMB is enabled.
    pub max_iob_smb_u: f64,
}

pub const fn limits_for(age: AgeProfile) -> AgeLimits {
    let (max_bolus_u, max_basal_u_per_h, max_iob_ama_u, max_iob_smb_u) = match age {
        AgeProfile::Child => (5.0, 2.0, 3.0, 7.0),
        AgeProfile::Teenage => (10.0, 5.0, 5.0, 13.0),
        AgeProfile::Adult => (17.0, 10.0, 7.0, 22.0),
        AgeProfile::ResistantAdult => (25.0, 12.0, 12.0, 30.0),
        AgeProfile::Pregnant => (60.0, 25.0, 25.0, 70.0),
    };
    AgeLimits {
        max_bolus_u,
        max_basal_u_per_h,
        max_iob_ama_u,
        max_iob_smb_u,
    }
}

/// Mandatory source holding the compiled-in ceilings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardLimits;

impl ConstraintSource for HardLimits {
    fn name(&self) -> &'static str {
        NAME
    }

    fn narrow_rate(
        &self,
        kind: RateLimit,
        c: Constraint<f64>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<f64> {
        let age = ctx.config.age;
        let limits = limits_for(age);
        let at = ctx.now_ms;
        match kind {
            RateLimit::MaxBolus => c.limit(
                limits.max_bolus_u,
                NAME,
                format!("hard limit for {:?}: {:.1} U", age, limits.max_bolus_u),
                at,
            ),
            RateLimit::MaxBasalRate => c.limit(
                limits.max_basal_u_per_h,
                NAME,
                format!("hard limit for {:?}: {:.1} U/h", age, limits.max_basal_u_per_h),
                at,
            ),
            RateLimit::MaxIob => {
                let (iob, algorithm) = if ctx.config.smb_enabled {
                    (limits.max_iob_smb_u, "SMB")
                } else {
                    (limits.max_iob_ama_u, "AMA")
                };
                c.limit(
                    iob,
                    NAME,
                    format!("hard limit for {:?} ({algorithm}): {iob:.1} U", age),
                    at,
                )
            }
        }
    }

    fn narrow_count(
        &self,
        kind: CountLimit,
        c: Constraint<i32>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<i32> {
        let at = ctx.now_ms;
        match kind {
            CountLimit::MaxCarbs => c.limit(
                MAX_CARBS_G,
                NAME,
                format!("hard limit: {MAX_CARBS_G} g"),
                at,
            ),
            CountLimit::MaxBasalPercent => {
                let mut candidates = vec![(
                    MAX_BASAL_PERCENT,
                    format!("hard limit: {MAX_BASAL_PERCENT} %"),
                )];
                // The absolute basal ceiling expressed against the current rate.
                if let Some(basal) = ctx.current_basal().filter(|b| *b > 0.0) {
                    let max = limits_for(ctx.config.age).max_basal_u_per_h;
                    candidates.push((
                        (max / basal * 100.0).floor() as i32,
                        format!("hard limit {max:.1} U/h at basal {basal:.2} U/h"),
                    ));
                }
                c.limit_tightest(candidates, NAME, at)
            }
        }
    }
}
