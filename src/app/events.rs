//! Outbound application events.
//!
//! The [`LoopService`](super::service::LoopService) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log, show in a UI, queue for upload.

use crate::glucose::TrendArrow;
use crate::mode::{ModeTarget, OperatingMode};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Per-cycle snapshot.
    Telemetry(LoopTelemetry),

    /// A mode change was accepted and recorded.
    ModeChanged {
        from: OperatingMode,
        to: OperatingMode,
        record_id: u32,
        auto_forced: bool,
    },

    /// A mode change was refused; nothing was recorded.
    ModeChangeRejected { target: ModeTarget, reason: String },

    /// No usable glucose this cycle. Carries the newest reading's time, if any.
    GlucoseStale { newest_ms: Option<i64> },

    /// A config update failed validation and was not applied.
    ConfigRejected(&'static str),

    /// The service has started (carries the restored mode).
    Started(OperatingMode),
}

/// A point-in-time snapshot suitable for logging or display.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopTelemetry {
    pub cycle: u64,
    pub mode: OperatingMode,
    pub glucose: Option<f64>,
    pub delta: Option<f64>,
    pub trend: Option<TrendArrow>,
    pub max_bolus_u: f64,
    pub max_basal_u_per_h: f64,
    pub max_iob_u: f64,
    pub closed_loop_allowed: bool,
    pub smb_allowed: bool,
}
