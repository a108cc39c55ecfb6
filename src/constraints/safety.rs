//! Preference-driven limits.
//!
//! Turns the user's [`SystemConfig`](crate::config::SystemConfig) and the
//! active profile into constraint candidates. Basal ceilings come in three
//! flavours and the tightest one is recorded:
//!
//! - absolute preference (`max_basal_u_per_h`),
//! - multiplier × basal currently in effect,
//! - daily multiplier × highest basal of the day.

use crate::config::ApsMode;
use crate::mode::OperatingMode;

use super::{Constraint, ConstraintContext, ConstraintSource, CountLimit, Permission, RateLimit};

pub const NAME: &str = "safety";

/// Source built from user preferences and the active profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetySource;

impl SafetySource {
    /// Every basal ceiling that applies right now, with its explanation.
    fn basal_ceilings(ctx: &ConstraintContext<'_>) -> Vec<(f64, String)> {
        let cfg = ctx.config;
        let mut ceilings = vec![(
            cfg.max_basal_u_per_h,
            format!("max basal in preferences: {:.2} U/h", cfg.max_basal_u_per_h),
        )];
        if let Some(profile) = ctx.profile {
            let current = profile.basal_at(ctx.now_ms, ctx.utc_offset_ms);
            ceilings.push((
                current * cfg.max_basal_multiplier,
                format!(
                    "{:.1} × current basal {:.2} U/h",
                    cfg.max_basal_multiplier, current
                ),
            ));
            let daily = profile.max_daily_basal();
            ceilings.push((
                daily * cfg.max_daily_basal_multiplier,
                format!(
                    "{:.1} × max daily basal {:.2} U/h",
                    cfg.max_daily_basal_multiplier, daily
                ),
            ));
        }
        ceilings
    }

    fn lgs_active(ctx: &ConstraintContext<'_>) -> bool {
        ctx.config.aps_mode == ApsMode::Lgs || ctx.mode == OperatingMode::ClosedLoopLgs
    }
}

impl ConstraintSource for SafetySource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn narrow_permission(
        &self,
        kind: Permission,
        c: Constraint<bool>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        let cfg = ctx.config;
        let at = ctx.now_ms;
        match kind {
            Permission::LoopInvocation if ctx.profile.is_none() => {
                c.disallow(NAME, "no active profile", at)
            }
            // LGS is a restricted closed loop; it keeps closed-loop permission.
            Permission::ClosedLoop if cfg.aps_mode == ApsMode::Open => {
                c.disallow(NAME, "closed loop disabled in preferences", at)
            }
            Permission::Lgs if cfg.aps_mode == ApsMode::Open => {
                c.disallow(NAME, "LGS disabled in preferences (open loop)", at)
            }
            Permission::Smb => {
                let mut reasons = Vec::new();
                if !cfg.smb_enabled {
                    reasons.push("SMB disabled in preferences");
                }
                if cfg.aps_mode != ApsMode::Closed {
                    reasons.push("SMB requires closed loop mode");
                }
                c.disallow_all(NAME, &reasons, at)
            }
            Permission::Autosens if !cfg.autosens_enabled => {
                c.disallow(NAME, "autosens disabled in preferences", at)
            }
            _ => c,
        }
    }

    fn narrow_rate(
        &self,
        kind: RateLimit,
        c: Constraint<f64>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<f64> {
        let cfg = ctx.config;
        let at = ctx.now_ms;
        match kind {
            RateLimit::MaxBolus => c.limit(
                cfg.max_bolus_u,
                NAME,
                format!("max bolus in preferences: {:.2} U", cfg.max_bolus_u),
                at,
            ),
            RateLimit::MaxBasalRate => c.limit_tightest(Self::basal_ceilings(ctx), NAME, at),
            RateLimit::MaxIob => {
                let mut candidates = Vec::with_capacity(2);
                if Self::lgs_active(ctx) {
                    candidates.push((0.0, "low glucose suspend mode".to_string()));
                }
                candidates.push((
                    cfg.max_iob_u,
                    format!("max IOB in preferences: {:.2} U", cfg.max_iob_u),
                ));
                c.limit_tightest(candidates, NAME, at)
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
                ctx.config.max_carbs_g,
                NAME,
                format!("max carbs in preferences: {} g", ctx.config.max_carbs_g),
                at,
            ),
            CountLimit::MaxBasalPercent => match ctx.current_basal() {
                Some(basal) if basal > 0.0 => c.limit_tightest(
                    Self::basal_ceilings(ctx)
                        .into_iter()
                        .map(|(v, why)| ((v / basal * 100.0).floor() as i32, why)),
                    NAME,
                    at,
                ),
                _ => c,
            },
        }
    }
}
