//! Limits reported by the pump driver.

use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintContext, ConstraintSource, CountLimit, Permission, RateLimit};

pub const NAME: &str = "pump";

/// Snapshot of what the connected pump can do right now.
///
/// `Default` describes a pump that has not reported yet: nothing is
/// possible until the driver says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PumpCapabilities {
    pub initialized: bool,
    pub suspended: bool,
    pub supports_temp_basal: bool,
    pub max_bolus_u: Option<f64>,
    pub max_basal_u_per_h: Option<f64>,
    pub max_basal_percent: Option<i32>,
}

impl PumpCapabilities {
    /// An initialised, running pump with temp-basal support and no ceilings.
    pub const fn ready() -> Self {
        Self {
            initialized: true,
            suspended: false,
            supports_temp_basal: true,
            max_bolus_u: None,
            max_basal_u_per_h: None,
            max_basal_percent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PumpSource;

impl ConstraintSource for PumpSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn narrow_permission(
        &self,
        kind: Permission,
        c: Constraint<bool>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        let pump = ctx.pump;
        let at = ctx.now_ms;
        match kind {
            Permission::LoopInvocation => {
                let mut reasons = Vec::new();
                if !pump.initialized {
                    reasons.push("pump is not initialized");
                }
                if pump.suspended {
                    reasons.push("pump is suspended");
                }
                c.disallow_all(NAME, &reasons, at)
            }
            Permission::ClosedLoop | Permission::Lgs if !pump.supports_temp_basal => {
                c.disallow(NAME, "pump does not support temporary basals", at)
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
        let at = ctx.now_ms;
        match (kind, ctx.pump.max_bolus_u, ctx.pump.max_basal_u_per_h) {
            (RateLimit::MaxBolus, Some(max), _) => {
                c.limit(max, NAME, format!("pump limit: {max:.2} U"), at)
            }
            (RateLimit::MaxBasalRate, _, Some(max)) => {
                c.limit(max, NAME, format!("pump limit: {max:.2} U/h"), at)
            }
            _ => c,
        }
    }

    fn narrow_count(
        &self,
        kind: CountLimit,
        c: Constraint<i32>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<i32> {
        match (kind, ctx.pump.max_basal_percent) {
            (CountLimit::MaxBasalPercent, Some(max)) => {
                c.limit(max, NAME, format!("pump limit: {max} %"), ctx.now_ms)
            }
            _ => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::constraints::ConstraintAggregator;
    use crate::constraints::tests::ctx;

    fn only_pump() -> ConstraintAggregator {
        let mut agg = ConstraintAggregator::new();
        agg.register(Box::new(PumpSource));
        agg
    }

    #[test]
    fn unreported_pump_blocks_loop() {
        let config = SystemConfig::default();
        let mut c = ctx(&config);
        c.pump = PumpCapabilities::default();
        let p = only_pump().is_loop_invocation_allowed(&c);
        assert!(!p.value());
        assert_eq!(p.most_limiting()[0].message, "pump is not initialized");
    }

    #[test]
    fn suspended_pump_blocks_loop() {
        let config = SystemConfig::default();
        let mut c = ctx(&config);
        c.pump.suspended = true;
        assert!(!only_pump().is_loop_invocation_allowed(&c).value());

        c.pump.initialized = false;
        let p = only_pump().is_loop_invocation_allowed(&c);
        assert_eq!(p.history().len(), 1);
        assert_eq!(p.most_limiting()[0].message, "pump is not initialized; pump is suspended");
    }

    #[test]
    fn no_temp_basal_blocks_closed_and_lgs() {
        let config = SystemConfig::default();
        let mut c = ctx(&config);
        c.pump.supports_temp_basal = false;
        assert!(!only_pump().is_closed_loop_allowed(&c).value());
        assert!(!only_pump().is_lgs_allowed(&c).value());
        assert!(only_pump().is_loop_invocation_allowed(&c).value());
    }

    #[test]
    fn pump_ceilings() {
        let config = SystemConfig::default();
        let mut c = ctx(&config);
        c.pump.max_bolus_u = Some(10.0);
        c.pump.max_basal_u_per_h = Some(3.5);
        c.pump.max_basal_percent = Some(200);
        let agg = only_pump();
        assert_eq!(agg.max_bolus(&c).value(), 10.0);
        assert_eq!(agg.max_basal(&c).value(), 3.5);
        assert_eq!(agg.max_basal_percent(&c).value(), 200);
    }
}
