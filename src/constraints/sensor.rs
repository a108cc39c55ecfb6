//! Limits derived from the glucose source.

use serde::{Deserialize, Serialize};

use super::{Constraint, ConstraintContext, ConstraintSource, Permission};

pub const NAME: &str = "sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorCapabilities {
    /// The source smooths its readings well enough for SMB at any time.
    pub advanced_filtering: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SensorSource;

impl ConstraintSource for SensorSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn narrow_permission(
        &self,
        kind: Permission,
        c: Constraint<bool>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        if kind == Permission::AdvancedFiltering && !ctx.sensor.advanced_filtering {
            c.disallow(NAME, "glucose source does not support advanced filtering", ctx.now_ms)
        } else {
            c
        }
    }
}
