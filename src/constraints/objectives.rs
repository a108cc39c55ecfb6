//! Objective-gate source: features stay off until onboarding unlocks them.

use std::sync::Arc;

use crate::app::ports::{GatedFeature, ObjectiveGate};

use super::{Constraint, ConstraintContext, ConstraintSource, Permission};

pub const NAME: &str = "objectives";

pub struct ObjectivesSource {
    gate: Arc<dyn ObjectiveGate + Send + Sync>,
}

impl ObjectivesSource {
    pub fn new(gate: Arc<dyn ObjectiveGate + Send + Sync>) -> Self {
        Self { gate }
    }
}

impl ConstraintSource for ObjectivesSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn narrow_permission(
        &self,
        kind: Permission,
        c: Constraint<bool>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        let feature = match kind {
            Permission::ClosedLoop => GatedFeature::ClosedLoop,
            Permission::Lgs => GatedFeature::Lgs,
            Permission::Smb => GatedFeature::Smb,
            Permission::Autosens => GatedFeature::Autosens,
            Permission::LoopInvocation | Permission::AdvancedFiltering => return c,
        };
        match self.gate.check(feature, ctx.now_ms) {
            Ok(()) => c,
            Err(blocked) => c.disallow(NAME, blocked.to_string(), ctx.now_ms),
        }
    }
}
