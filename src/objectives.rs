//! Progressive feature unlock.
//!
//! New users start with the loop locked down. Each [`Objective`] must be
//! started and then held for a minimum time (with enough manual
//! enactments and a complete setup where required) before the features
//! behind it open up. Objectives complete strictly in order: feature `F`
//! unlocks when every objective up to and including its gate is done.
//!
//! ```text
//!  1 setup ──▶ OpenLoop
//!  2 open loop (7 d, 20 enacts) ──▶ Lgs
//!  3 LGS (5 d) ──▶ ClosedLoop
//!  4 closed loop (1 d) ──▶ Autosens
//!  5 tuning (28 d) ──▶ Smb
//! ```

use crate::app::ports::{GateBlocked, GatedFeature, ObjectiveGate};

const MS_PER_DAY: i64 = 86_400_000;

/// One onboarding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objective {
    pub title: &'static str,
    /// Minimum time between start and completion.
    pub min_duration_ms: i64,
    /// Manual enactments of loop suggestions required.
    pub min_manual_enacts: u32,
    pub requires_complete_setup: bool,
    pub started_at_ms: Option<i64>,
}

impl Objective {
    pub const fn new(title: &'static str) -> Self {
        Self {
            title,
            min_duration_ms: 0,
            min_manual_enacts: 0,
            requires_complete_setup: false,
            started_at_ms: None,
        }
    }

    #[must_use]
    pub const fn lasting_days(mut self, days: i64) -> Self {
        self.min_duration_ms = days * MS_PER_DAY;
        self
    }

    #[must_use]
    pub const fn with_manual_enacts(mut self, n: u32) -> Self {
        self.min_manual_enacts = n;
        self
    }

    #[must_use]
    pub const fn needing_setup(mut self) -> Self {
        self.requires_complete_setup = true;
        self
    }
}

/// Concrete [`ObjectiveGate`]: the ordered objective list plus the
/// counters they are judged against.
#[derive(Debug, Clone)]
pub struct ObjectiveProgress {
    objectives: Vec<Objective>,
    manual_enacts: u32,
    setup_complete: bool,
}

impl ObjectiveProgress {
    /// The five-step onboarding path, nothing started.
    pub fn standard() -> Self {
        Self {
            objectives: vec![
                Objective::new("Configure profile, pump and glucose source").needing_setup(),
                Objective::new("Run the open loop and enact suggestions manually")
                    .lasting_days(7)
                    .with_manual_enacts(20),
                Objective::new("Close the loop with low glucose suspend").lasting_days(5),
                Objective::new("Run the full closed loop").lasting_days(1),
                Objective::new("Tune the closed loop before enabling SMB").lasting_days(28),
            ],
            manual_enacts: 0,
            setup_complete: false,
        }
    }

    /// Every objective finished; nothing is gated.
    pub fn completed() -> Self {
        let mut progress = Self::standard();
        for o in &mut progress.objectives {
            o.started_at_ms = Some(i64::MIN / 2);
            o.min_duration_ms = 0;
            o.min_manual_enacts = 0;
        }
        progress.setup_complete = true;
        progress
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    /// Begin objective `index` (0-based). Restarting keeps the first start.
    pub fn start(&mut self, index: usize, now_ms: i64) {
        if let Some(o) = self.objectives.get_mut(index) {
            o.started_at_ms.get_or_insert(now_ms);
        }
    }

    pub fn record_manual_enact(&mut self) {
        self.manual_enacts = self.manual_enacts.saturating_add(1);
    }

    pub fn set_setup_complete(&mut self, complete: bool) {
        self.setup_complete = complete;
    }

    pub fn is_accomplished(&self, index: usize, now_ms: i64) -> bool {
        let Some(o) = self.objectives.get(index) else {
            return false;
        };
        let Some(started) = o.started_at_ms else {
            return false;
        };
        now_ms.saturating_sub(started) >= o.min_duration_ms
            && self.manual_enacts >= o.min_manual_enacts
            && (!o.requires_complete_setup || self.setup_complete)
    }

    /// Index of the objective that unlocks `feature`.
    fn gate_index(feature: GatedFeature) -> usize {
        match feature {
            GatedFeature::OpenLoop => 0,
            GatedFeature::Lgs => 1,
            GatedFeature::ClosedLoop => 2,
            GatedFeature::Autosens => 3,
            GatedFeature::Smb => 4,
        }
    }
}

impl ObjectiveGate for ObjectiveProgress {
    fn check(&self, feature: GatedFeature, now_ms: i64) -> Result<(), GateBlocked> {
        let last = Self::gate_index(feature).min(self.objectives.len().saturating_sub(1));
        for index in 0..=last {
            if index < self.objectives.len() && !self.is_accomplished(index, now_ms) {
                return Err(GateBlocked {
                    objective: index + 1,
                    title: self.objectives[index].title.into(),
                });
            }
        }
        Ok(())
    }
}
