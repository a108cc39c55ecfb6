//! Scenario replay adapter for the host simulator.
//!
//! A [`Scenario`] is a JSON document describing preferences, the profile,
//! recorded CGM samples, pump suspensions and timed mode requests. The
//! [`Replay`] adapter serves it through the loop ports one cycle at a time
//! on a simulated clock.
//!
//! ```json
//! {
//!   "start_ms": 1700000000000,
//!   "cycles": 12,
//!   "config": { "aps_mode": "Closed" },
//!   "profile": { "name": "default", "basal": [{ "start_minute": 0, "rate_u_per_h": 0.8 }] },
//!   "samples": [{ "value": 120.0, "timestamp_ms": 1700000000000 }],
//!   "requests": [{ "at_cycle": 1, "request": { "target": { "Mode": "ClosedLoop" } } }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::app::ports::{ClockPort, GlucoseSourcePort, ProfilePort, PumpStatusPort};
use crate::config::SystemConfig;
use crate::constraints::{PumpCapabilities, SensorCapabilities};
use crate::glucose::GlucoseSample;
use crate::mode::ModeChangeRequest;
use crate::objectives::ObjectiveProgress;
use crate::profile::Profile;

/// Inclusive range of cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRange {
    pub from: u32,
    pub to: u32,
}

impl CycleRange {
    pub fn contains(&self, cycle: u32) -> bool {
        (self.from..=self.to).contains(&cycle)
    }
}

/// A mode request issued before the given cycle runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRequest {
    pub at_cycle: u32,
    pub request: ModeChangeRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub start_ms: i64,
    pub cycles: u32,
    #[serde(default)]
    pub utc_offset_ms: i64,
    #[serde(default)]
    pub config: SystemConfig,
    #[serde(default)]
    pub profile: Option<Profile>,
    /// Start with every onboarding objective open instead of finished.
    #[serde(default)]
    pub fresh_install: bool,
    #[serde(default)]
    pub samples: Vec<GlucoseSample>,
    #[serde(default = "PumpCapabilities::ready")]
    pub pump: PumpCapabilities,
    #[serde(default)]
    pub sensor: SensorCapabilities,
    #[serde(default)]
    pub pump_suspended: Vec<CycleRange>,
    #[serde(default)]
    pub requests: Vec<ScheduledRequest>,
}

/// Serves a [`Scenario`] through the loop ports.
pub struct Replay {
    scenario: Scenario,
    cycle: u32,
    now_ms: i64,
}

impl Replay {
    pub fn new(mut scenario: Scenario) -> Self {
        scenario
            .samples
            .sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        Self {
            cycle: 0,
            now_ms: scenario.start_ms,
            scenario,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self::new)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.scenario.config
    }

    pub fn objectives(&self) -> ObjectiveProgress {
        if self.scenario.fresh_install {
            ObjectiveProgress::standard()
        } else {
            ObjectiveProgress::completed()
        }
    }

    pub fn cycles(&self) -> u32 {
        self.scenario.cycles
    }

    /// 0 before the first [`advance`](Self::advance), then 1-based.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Requests scheduled for the current cycle.
    pub fn due_requests(&self) -> impl Iterator<Item = &ModeChangeRequest> {
        let cycle = self.cycle;
        self.scenario
            .requests
            .iter()
            .filter(move |r| r.at_cycle == cycle)
            .map(|r| &r.request)
    }

    /// Move to the next cycle; the first call keeps the start time.
    pub fn advance(&mut self) {
        if self.cycle > 0 {
            self.now_ms += i64::from(self.scenario.config.loop_interval_secs) * 1000;
        }
        self.cycle += 1;
    }
}

impl GlucoseSourcePort for Replay {
    fn recent_samples(&mut self, now_ms: i64, window_minutes: u32) -> Vec<GlucoseSample> {
        let oldest = now_ms - i64::from(window_minutes) * 60_000;
        self.scenario
            .samples
            .iter()
            .filter(|s| s.timestamp_ms <= now_ms && s.timestamp_ms >= oldest)
            .copied()
            .collect()
    }

    fn sensor_capabilities(&self) -> SensorCapabilities {
        self.scenario.sensor
    }
}

impl PumpStatusPort for Replay {
    fn pump_capabilities(&mut self) -> PumpCapabilities {
        let mut pump = self.scenario.pump;
        if self.scenario.pump_suspended.iter().any(|r| r.contains(self.cycle)) {
            pump.suspended = true;
        }
        pump
    }
}

impl ProfilePort for Replay {
    fn active_profile(&self) -> Option<Profile> {
        self.scenario.profile.clone()
    }
}

impl ClockPort for Replay {
    fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn utc_offset_ms(&self) -> i64 {
        self.scenario.utc_offset_ms
    }
}
