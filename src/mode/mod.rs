//! Operating-mode state machine.
//!
//! ```text
//!                ┌──────────────┐  any permitted
//!     ┌─────────▶│ DisabledLoop │◀─────────────┐
//!     │          └──────┬───────┘              │
//!     │                 │ permission + gate    │
//!     │                 ▼                      │
//!     │   OpenLoop ◀──▶ ClosedLoop ◀──▶ ClosedLoopLgs
//!     │                 │
//!     │                 │ duration ≥ min
//!     │                 ▼
//!     │   SuperBolus · DisconnectedPump · SuspendedByPump · SuspendedByUser
//!     │                 │
//!     └──── Resume ─────┘  (closed → LGS → open → disabled, first permitted)
//! ```
//!
//! The controller owns the current mode and the record arena. Every
//! accepted transition writes exactly one [`ModeRecord`]; a rejected one
//! writes nothing and leaves the mode unchanged.

pub mod record;
pub mod shared;

use core::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{GatedFeature, ObjectiveGate};
use crate::config::ApsMode;
use crate::constraints::{ConstraintAggregator, ConstraintContext};
use crate::error::ModeChangeError;

pub use record::{ModeHistory, ModeRecord, StorageModeHistory};
pub use shared::{ModeSnapshot, SharedModeController};

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperatingMode {
    OpenLoop = 0,
    ClosedLoop = 1,
    ClosedLoopLgs = 2,
    #[default]
    DisabledLoop = 3,
    SuperBolus = 4,
    DisconnectedPump = 5,
    SuspendedByPump = 6,
    SuspendedByUser = 7,
}

impl OperatingMode {
    pub const ALL: [Self; 8] = [
        Self::OpenLoop,
        Self::ClosedLoop,
        Self::ClosedLoopLgs,
        Self::DisabledLoop,
        Self::SuperBolus,
        Self::DisconnectedPump,
        Self::SuspendedByPump,
        Self::SuspendedByUser,
    ];

    /// Temporary modes need a planned duration and can only be left via Resume.
    pub const fn must_be_temporary(self) -> bool {
        matches!(
            self,
            Self::SuperBolus | Self::DisconnectedPump | Self::SuspendedByPump | Self::SuspendedByUser
        )
    }

    pub const fn is_closed_loop_or_lgs(self) -> bool {
        matches!(self, Self::ClosedLoop | Self::ClosedLoopLgs)
    }

    pub const fn is_loop_running(self) -> bool {
        matches!(self, Self::OpenLoop | Self::ClosedLoop | Self::ClosedLoopLgs)
    }

    pub const fn is_suspended(self) -> bool {
        matches!(
            self,
            Self::DisconnectedPump | Self::SuspendedByPump | Self::SuspendedByUser
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenLoop => "open loop",
            Self::ClosedLoop => "closed loop",
            Self::ClosedLoopLgs => "closed loop (LGS)",
            Self::DisabledLoop => "loop disabled",
            Self::SuperBolus => "super bolus",
            Self::DisconnectedPump => "pump disconnected",
            Self::SuspendedByPump => "suspended by pump",
            Self::SuspendedByUser => "suspended by user",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a request asks for: a concrete mode, or "go back to normal".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeTarget {
    Mode(OperatingMode),
    /// Leave the active temporary mode. Never persisted.
    Resume,
}

impl fmt::Display for ModeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mode(m) => m.fmt(f),
            Self::Resume => f.write_str("resume"),
        }
    }
}

impl From<OperatingMode> for ModeTarget {
    fn from(mode: OperatingMode) -> Self {
        Self::Mode(mode)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReasonSource {
    #[default]
    User,
    Automation,
    Pump,
    /// Planned duration ran out.
    Expiry,
}

impl fmt::Display for ReasonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Automation => "automation",
            Self::Pump => "pump",
            Self::Expiry => "expiry",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeChangeRequest {
    pub target: ModeTarget,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub auto_forced: bool,
    #[serde(default)]
    pub source: ReasonSource,
    #[serde(default)]
    pub reason: String,
}

impl ModeChangeRequest {
    /// A user request without duration.
    pub fn user(target: impl Into<ModeTarget>) -> Self {
        Self {
            target: target.into(),
            duration_minutes: None,
            auto_forced: false,
            source: ReasonSource::User,
            reason: String::new(),
        }
    }

    /// A system-forced request.
    pub fn forced(target: impl Into<ModeTarget>, source: ReasonSource) -> Self {
        Self {
            auto_forced: true,
            source,
            ..Self::user(target)
        }
    }

    #[must_use]
    pub fn for_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    fn reasons_text(&self) -> String {
        if self.reason.is_empty() {
            self.source.to_string()
        } else {
            format!("{}: {}", self.source, self.reason)
        }
    }
}

/// Result of an accepted request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeChange {
    pub from: OperatingMode,
    pub mode: OperatingMode,
    /// `None` for the idempotent no-op.
    pub record_id: Option<u32>,
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ModeController<H: ModeHistory> {
    current: OperatingMode,
    /// Record that put the controller into `current`.
    active: Option<ModeRecord>,
    history: H,
    gate: Arc<dyn ObjectiveGate + Send + Sync>,
    /// Id of a record whose write failed and that no accepted record has
    /// referenced yet.
    dangling: Option<u32>,
}

impl<H: ModeHistory> ModeController<H> {
    /// Start in [`OperatingMode::DisabledLoop`].
    pub fn new(history: H, gate: Arc<dyn ObjectiveGate + Send + Sync>) -> Self {
        Self {
            current: OperatingMode::DisabledLoop,
            active: None,
            history,
            gate,
            dangling: None,
        }
    }

    /// Pick up the mode of the newest stored record, if any.
    pub fn restore(&mut self) -> OperatingMode {
        if let Some(latest) = self.history.latest() {
            info!("restored {} from record {}", latest.mode, latest.id);
            self.current = latest.mode;
            self.active = Some(latest);
        }
        self.current
    }

    pub fn current(&self) -> OperatingMode {
        self.current
    }

    pub fn active_record(&self) -> Option<&ModeRecord> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn dangling_id(&self) -> Option<u32> {
        self.dangling
    }

    /// Planned end of the active temporary mode.
    pub fn expires_at_ms(&self) -> Option<i64> {
        if !self.current.must_be_temporary() {
            return None;
        }
        self.active.as_ref().and_then(ModeRecord::end_ms)
    }

    pub fn is_temporary_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms().is_some_and(|end| now_ms >= end)
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            mode: self.current,
            active_record: self.active.clone(),
            expires_at_ms: self.expires_at_ms(),
        }
    }

    // ── Permission checks ─────────────────────────────────────

    /// Why `mode` cannot be entered from a non-temporary state, if it can't.
    fn permission_block(
        &self,
        mode: OperatingMode,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> Option<String> {
        let (gate, extra) = match mode {
            OperatingMode::OpenLoop => (GatedFeature::OpenLoop, None),
            OperatingMode::ClosedLoop => (
                GatedFeature::ClosedLoop,
                Some(aggregator.is_closed_loop_allowed(ctx)),
            ),
            OperatingMode::ClosedLoopLgs => (GatedFeature::Lgs, Some(aggregator.is_lgs_allowed(ctx))),
            _ => return None,
        };

        let mut blocked = false;
        let mut reasons: Vec<String> = Vec::new();
        let invocation = aggregator.is_loop_invocation_allowed(ctx);
        if !invocation.value() {
            blocked = true;
            reasons.push(invocation.most_limiting_reasons());
        }
        if let Some(c) = extra.as_ref().filter(|c| !c.value()) {
            blocked = true;
            reasons.push(c.most_limiting_reasons());
        }
        // The LGS preference runs the closed loop only in its LGS variant.
        if mode == OperatingMode::ClosedLoop && ctx.config.aps_mode == ApsMode::Lgs {
            blocked = true;
            reasons.push("closed loop limited to LGS in preferences".into());
        }
        if let Err(gate_blocked) = self.gate.check(gate, ctx.now_ms) {
            blocked = true;
            let text = gate_blocked.to_string();
            // The objectives source may already have reported it.
            if !reasons.iter().any(|r| r.contains(&text)) {
                reasons.push(text);
            }
        }
        if !blocked {
            return None;
        }
        reasons.retain(|r| !r.is_empty());
        if reasons.is_empty() {
            reasons.push("no constraint source allowed it".into());
        }
        Some(reasons.join("; "))
    }

    fn is_permitted(
        &self,
        mode: OperatingMode,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> bool {
        self.permission_block(mode, aggregator, ctx).is_none()
    }

    /// Targets reachable from the current mode.
    pub fn allowed_next_modes(
        &self,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> heapless::Vec<ModeTarget, 9> {
        let mut out = heapless::Vec::new();
        if self.current.must_be_temporary() {
            let _ = out.push(ModeTarget::Resume);
            let _ = out.push(ModeTarget::Mode(self.current));
            return out;
        }
        let ctx = ctx.with_mode(self.current);
        for mode in OperatingMode::ALL {
            if self.is_permitted(mode, aggregator, &ctx) {
                let _ = out.push(ModeTarget::Mode(mode));
            }
        }
        out
    }

    /// Mode `Resume` resolves to: closed loop if allowed, else open loop,
    /// else disabled. Under the LGS preference the closed loop is
    /// [`OperatingMode::ClosedLoopLgs`].
    pub fn resume_target(
        &self,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> OperatingMode {
        let closed = match ctx.config.aps_mode {
            ApsMode::Lgs => OperatingMode::ClosedLoopLgs,
            _ => OperatingMode::ClosedLoop,
        };
        if aggregator.is_closed_loop_allowed(ctx).value()
            && self.is_permitted(closed, aggregator, ctx)
        {
            closed
        } else if self.is_permitted(OperatingMode::OpenLoop, aggregator, ctx) {
            OperatingMode::OpenLoop
        } else {
            OperatingMode::DisabledLoop
        }
    }

    // ── Transitions ───────────────────────────────────────────

    /// Validate `request` against the current state and, if accepted,
    /// record it and switch modes.
    pub fn handle_running_mode_change(
        &mut self,
        request: &ModeChangeRequest,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> Result<ModeChange, ModeChangeError> {
        let result = self.try_change(request, aggregator, ctx);
        if let Err(e) = &result {
            warn!("mode change to {} rejected: {}", request.target, e);
        }
        result
    }

    fn try_change(
        &mut self,
        request: &ModeChangeRequest,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> Result<ModeChange, ModeChangeError> {
        if ctx.profile.is_none() {
            return Err(ModeChangeError::NoProfile);
        }
        let ctx = ctx.with_mode(self.current);
        let current = self.current;
        let not_allowed = |reason: String| ModeChangeError::NotAllowed {
            current,
            target: request.target,
            reason,
        };

        let target = match request.target {
            ModeTarget::Resume if current == OperatingMode::DisabledLoop => {
                return Err(not_allowed("loop is disabled, nothing to resume".into()));
            }
            ModeTarget::Resume if !current.must_be_temporary() => {
                return Err(not_allowed(format!("{current} is not temporary, nothing to resume")));
            }
            ModeTarget::Resume => self.resume_target(aggregator, &ctx),
            ModeTarget::Mode(mode) if current.must_be_temporary() && mode != current => {
                let reason = if current.is_suspended() && mode.is_suspended() {
                    "already suspended".to_string()
                } else {
                    format!("{current} is active, resume first")
                };
                return Err(not_allowed(reason));
            }
            ModeTarget::Mode(mode) if current.must_be_temporary() => mode,
            ModeTarget::Mode(mode) => {
                if let Some(reason) = self.permission_block(mode, aggregator, &ctx) {
                    return Err(not_allowed(reason));
                }
                mode
            }
        };

        let planned_duration_ms = if target.must_be_temporary() {
            let minimum = ctx.config.min_temporary_minutes;
            match request.duration_minutes {
                Some(d) if d > minimum => i64::from(d) * 60_000,
                requested => {
                    return Err(ModeChangeError::DurationTooShort {
                        mode: target,
                        requested,
                        minimum,
                    });
                }
            }
        } else {
            0
        };

        if target == current && !target.must_be_temporary() {
            return Ok(ModeChange {
                from: current,
                mode: target,
                record_id: None,
                comment: format!("already in {target}"),
            });
        }

        let record = ModeRecord {
            id: self.history.allocate_id(),
            timestamp_ms: ctx.now_ms,
            utc_offset_ms: ctx.utc_offset_ms,
            mode: target,
            planned_duration_ms,
            auto_forced: request.auto_forced,
            reasons: record::reasons_from(&request.reasons_text()),
            reference_id: self.dangling,
        };

        if let Err(e) = self.history.append(&record) {
            error!("mode record {} not stored: {}", record.id, e);
            self.dangling = Some(record.id);
            return Err(ModeChangeError::Persistence(e));
        }

        info!(
            "mode {} -> {} (record {}{})",
            current,
            target,
            record.id,
            if record.auto_forced { ", forced" } else { "" }
        );
        let comment = if planned_duration_ms > 0 {
            format!("{current} -> {target} for {} min", planned_duration_ms / 60_000)
        } else {
            format!("{current} -> {target}")
        };
        let record_id = record.id;
        self.current = target;
        self.active = Some(record);
        self.dangling = None;

        Ok(ModeChange {
            from: current,
            mode: target,
            record_id: Some(record_id),
            comment,
        })
    }
}
