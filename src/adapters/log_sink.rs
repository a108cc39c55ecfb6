//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade. An uploader or UI adapter would implement the same
//! trait.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                info!(
                    "LOOP  | #{} {} | bg={} delta={} | max bolus={:.2}U basal={:.2}U/h iob={:.2}U | \
                     closed={} smb={}",
                    t.cycle,
                    t.mode,
                    t.glucose.map_or_else(|| "--".into(), |g| format!("{g:.0}")),
                    t.delta.map_or_else(|| "--".into(), |d| format!("{d:+.1}")),
                    t.max_bolus_u,
                    t.max_basal_u_per_h,
                    t.max_iob_u,
                    t.closed_loop_allowed,
                    t.smb_allowed,
                );
            }
            AppEvent::ModeChanged {
                from,
                to,
                record_id,
                auto_forced,
            } => {
                info!(
                    "MODE  | {} -> {} (record {}{})",
                    from,
                    to,
                    record_id,
                    if *auto_forced { ", forced" } else { "" }
                );
            }
            AppEvent::ModeChangeRejected { target, reason } => {
                warn!("MODE  | {} rejected: {}", target, reason);
            }
            AppEvent::GlucoseStale { newest_ms } => match newest_ms {
                Some(ts) => warn!("BG    | stale, newest reading at {}", ts),
                None => warn!("BG    | no readings"),
            },
            AppEvent::ConfigRejected(msg) => {
                warn!("CONFIG| rejected: {}", msg);
            }
            AppEvent::Started(mode) => {
                info!("START | mode={}", mode);
            }
        }
    }
}
