//! Loop service: the hexagonal core.
//!
//! [`LoopService`] owns the preferences, the constraint aggregator and the
//! mode controller. It exposes a device-agnostic API; all I/O flows
//! through port traits injected at call sites.
//!
//! ```text
//!  GlucoseSourcePort ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  PumpStatusPort    ──▶ │          LoopService          │
//!  ProfilePort       ──▶ │ Trend · Constraints · Modes   │ ──▶ CycleReport
//!  ClockPort         ──▶ └──────────────────────────────┘
//! ```

use std::sync::Arc;

use log::{info, warn};

use crate::config::{SystemConfig, validate_config};
use crate::constraints::{ConstraintAggregator, ConstraintContext, LoopBounds};
use crate::error::ModeChangeError;
use crate::glucose::{ExtendedGlucoseStatus, GlucoseStatus, TrendCalculator};
use crate::mode::{
    ModeChange, ModeChangeRequest, ModeController, ModeHistory, ModeSnapshot, ModeTarget,
    OperatingMode, ReasonSource, SharedModeController,
};
use crate::profile::Profile;

use super::commands::{AppCommand, CommandReply};
use super::events::{AppEvent, LoopTelemetry};
use super::ports::{ConfigPort, EventSink, LoopEnvironment};

/// Minutes of CGM history requested each cycle; covers the long-delta and
/// parabola windows.
const SAMPLE_WINDOW_MINUTES: u32 = 50;

/// What one cycle hands to the dosing algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub mode: OperatingMode,
    /// `None` when glucose is missing or stale.
    pub glucose: Option<ExtendedGlucoseStatus>,
    pub bounds: LoopBounds,
}

impl CycleReport {
    pub fn status(&self) -> Option<GlucoseStatus> {
        self.glucose.map(|g| g.base)
    }
}

// ───────────────────────────────────────────────────────────────
// LoopService
// ───────────────────────────────────────────────────────────────

pub struct LoopService<H: ModeHistory> {
    config: SystemConfig,
    aggregator: ConstraintAggregator,
    modes: Arc<SharedModeController<H>>,
    trend: TrendCalculator,
    cycle_count: u64,
    last_status: Option<GlucoseStatus>,
    config_dirty: bool,
}

impl<H: ModeHistory> LoopService<H> {
    /// Construct the service. Does not touch storage; call [`start`](Self::start) next.
    pub fn new(config: SystemConfig, aggregator: ConstraintAggregator, modes: ModeController<H>) -> Self {
        Self {
            trend: TrendCalculator::new(&config),
            config,
            aggregator,
            modes: Arc::new(SharedModeController::new(modes)),
            cycle_count: 0,
            last_status: None,
            config_dirty: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore the last recorded mode and announce it.
    pub fn start(&mut self, sink: &mut impl EventSink) -> OperatingMode {
        let mode = self.modes.with(ModeController::restore);
        sink.emit(&AppEvent::Started(mode));
        info!("loop service started in {}", mode);
        mode
    }

    // ── Per-cycle orchestration ───────────────────────────────

    /// Run one loop cycle: glucose → mode upkeep → bounds → events.
    pub fn tick(&mut self, env: &mut impl LoopEnvironment, sink: &mut impl EventSink) -> CycleReport {
        self.cycle_count += 1;
        let now_ms = env.now_ms();

        // 1. Glucose
        let samples = env.recent_samples(now_ms, SAMPLE_WINDOW_MINUTES);
        let glucose = self.trend.extended_status(&samples, now_ms, false);
        if glucose.is_none() {
            let newest_ms = self.trend.status(&samples, now_ms, true).map(|s| s.date_ms);
            warn!("cycle {}: no fresh glucose", self.cycle_count);
            sink.emit(&AppEvent::GlucoseStale { newest_ms });
        }
        self.last_status = glucose.map(|g| g.base);

        // 2. Mode upkeep: expiry and pump synchronisation
        let profile = env.active_profile();
        let pump = env.pump_capabilities();
        let sensor = env.sensor_capabilities();
        let mut ctx = ConstraintContext {
            now_ms,
            utc_offset_ms: env.utc_offset_ms(),
            config: &self.config,
            profile: profile.as_ref(),
            mode: self.modes.current(),
            pump,
            sensor,
        };
        if let Some(request) = self.upkeep_request(&ctx) {
            let _ = self.apply_request(&request, &ctx, sink);
        }
        ctx.mode = self.modes.current();

        // 3. Bounds for the dosing algorithm
        let bounds = LoopBounds::evaluate(&self.aggregator, &ctx);

        sink.emit(&AppEvent::Telemetry(LoopTelemetry {
            cycle: self.cycle_count,
            mode: ctx.mode,
            glucose: self.last_status.map(|s| s.glucose),
            delta: self.last_status.map(|s| s.delta),
            trend: self.last_status.map(|s| s.trend),
            max_bolus_u: bounds.max_bolus.value(),
            max_basal_u_per_h: bounds.max_basal.value(),
            max_iob_u: bounds.max_iob.value(),
            closed_loop_allowed: bounds.closed_loop.value(),
            smb_allowed: bounds.smb.value(),
        }));

        CycleReport {
            cycle: self.cycle_count,
            mode: ctx.mode,
            glucose,
            bounds,
        }
    }

    /// The forced transition this cycle calls for, if any.
    fn upkeep_request(&self, ctx: &ConstraintContext<'_>) -> Option<ModeChangeRequest> {
        let snap = self.modes.snapshot();
        let expired = snap.expires_at_ms.is_some_and(|end| ctx.now_ms >= end);
        let reissue = self.config.pump_suspend_reissue_minutes;

        match (ctx.pump.suspended, snap.mode) {
            (true, OperatingMode::SuspendedByPump) if expired => Some(
                ModeChangeRequest::forced(OperatingMode::SuspendedByPump, ReasonSource::Pump)
                    .for_minutes(reissue)
                    .because("pump still suspended"),
            ),
            (true, mode) if !mode.must_be_temporary() => Some(
                ModeChangeRequest::forced(OperatingMode::SuspendedByPump, ReasonSource::Pump)
                    .for_minutes(reissue)
                    .because("pump reports suspended"),
            ),
            (false, OperatingMode::SuspendedByPump) => Some(
                ModeChangeRequest::forced(ModeTarget::Resume, ReasonSource::Pump)
                    .because("pump resumed"),
            ),
            (_, mode) if mode.must_be_temporary() && expired => Some(
                ModeChangeRequest::forced(ModeTarget::Resume, ReasonSource::Expiry)
                    .because("planned duration elapsed"),
            ),
            _ => None,
        }
    }

    fn apply_request(
        &self,
        request: &ModeChangeRequest,
        ctx: &ConstraintContext<'_>,
        sink: &mut impl EventSink,
    ) -> Result<ModeChange, ModeChangeError> {
        let result = self.modes.request(request, &self.aggregator, ctx);
        match &result {
            Ok(change) => {
                if let Some(record_id) = change.record_id {
                    sink.emit(&AppEvent::ModeChanged {
                        from: change.from,
                        to: change.mode,
                        record_id,
                        auto_forced: request.auto_forced,
                    });
                }
            }
            Err(e) => sink.emit(&AppEvent::ModeChangeRejected {
                target: request.target,
                reason: e.to_string(),
            }),
        }
        result
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command and answer synchronously.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        env: &mut impl LoopEnvironment,
        sink: &mut impl EventSink,
    ) -> CommandReply {
        match cmd {
            AppCommand::ChangeMode(request) => {
                let profile = env.active_profile();
                let ctx = self.context(env, profile.as_ref());
                match self.apply_request(&request, &ctx, sink) {
                    Ok(change) => CommandReply::ok(change.comment),
                    Err(e) => CommandReply::rejected(e.to_string()),
                }
            }
            AppCommand::UpdateConfig(new_config) => match validate_config(&new_config) {
                Ok(()) => {
                    self.trend = TrendCalculator::new(&new_config);
                    self.config = new_config;
                    self.config_dirty = true;
                    info!("configuration updated at runtime");
                    CommandReply::ok("configuration updated")
                }
                Err(e) => {
                    warn!("configuration rejected: {}", e);
                    if let crate::app::ports::ConfigError::ValidationFailed(msg) = e {
                        sink.emit(&AppEvent::ConfigRejected(msg));
                    }
                    CommandReply::rejected(e.to_string())
                }
            },
            AppCommand::SaveConfig => {
                self.config_dirty = true;
                info!("explicit config save requested");
                CommandReply::ok("config save scheduled")
            }
        }
    }

    fn context<'a>(&'a self, env: &mut impl LoopEnvironment, profile: Option<&'a Profile>) -> ConstraintContext<'a> {
        ConstraintContext {
            now_ms: env.now_ms(),
            utc_offset_ms: env.utc_offset_ms(),
            config: &self.config,
            profile,
            mode: self.modes.current(),
            pump: env.pump_capabilities(),
            sensor: env.sensor_capabilities(),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn mode(&self) -> OperatingMode {
        self.modes.current()
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.modes.snapshot()
    }

    /// Shared handle for readers on other threads.
    pub fn mode_handle(&self) -> Arc<SharedModeController<H>> {
        Arc::clone(&self.modes)
    }

    /// Targets a UI may offer right now.
    pub fn allowed_next_modes(&self, env: &mut impl LoopEnvironment) -> Vec<ModeTarget> {
        let profile = env.active_profile();
        let ctx = self.context(env, profile.as_ref());
        self.modes
            .with(|mc| mc.allowed_next_modes(&self.aggregator, &ctx).to_vec())
    }

    pub fn aggregator(&self) -> &ConstraintAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn last_status(&self) -> Option<GlucoseStatus> {
        self.last_status
    }

    /// Loop cycles executed since construction.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    // ── Config persistence ────────────────────────────────────

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }

    /// Persist the preferences if they changed. Returns `true` if saved.
    pub fn save_config_if_dirty(&mut self, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("config saved");
                true
            }
            Err(e) => {
                warn!("config save failed: {}", e);
                false
            }
        }
    }
}
