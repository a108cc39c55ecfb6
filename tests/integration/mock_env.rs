//! Mock loop environment for integration tests.
//!
//! One struct serves all four read ports so tests can script CGM readings,
//! pump state, the active profile and the clock, then step the service
//! cycle by cycle. Events are captured by [`RecordingSink`].

use apscore::app::events::AppEvent;
use apscore::app::ports::{
    ClockPort, EventSink, GlucoseSourcePort, ProfilePort, PumpStatusPort, StorageError,
    StoragePort,
};
use apscore::constraints::{PumpCapabilities, SensorCapabilities};
use apscore::glucose::GlucoseSample;
use apscore::profile::Profile;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const T0: i64 = 1_700_000_000_000;
pub const MIN: i64 = 60_000;

// ── MockEnv ───────────────────────────────────────────────────

pub struct MockEnv {
    pub now_ms: i64,
    pub utc_offset_ms: i64,
    /// Stored oldest first; served newest first.
    pub samples: Vec<GlucoseSample>,
    pub pump: PumpCapabilities,
    pub sensor: SensorCapabilities,
    pub profile: Option<Profile>,
}

#[allow(dead_code)]
impl MockEnv {
    pub fn new() -> Self {
        Self {
            now_ms: T0,
            utc_offset_ms: 0,
            samples: Vec::new(),
            pump: PumpCapabilities::ready(),
            sensor: SensorCapabilities::default(),
            profile: Some(Profile::flat("flat", 1.0)),
        }
    }

    /// Add a reading `minutes_ago` before the current clock.
    pub fn reading(&mut self, value: f64, minutes_ago: i64) -> &mut Self {
        self.samples
            .push(GlucoseSample::new(value, self.now_ms - minutes_ago * MIN));
        self.samples.sort_by_key(|s| s.timestamp_ms);
        self
    }

    /// Steady readings every 5 minutes over the last 45 minutes, plus
    /// `slope` mg/dL per 5 minutes.
    pub fn steady(&mut self, newest: f64, slope: f64) -> &mut Self {
        for i in 0..10 {
            self.reading(newest - slope * i as f64, 5 * i);
        }
        self
    }

    /// Advance the clock and append a reading taken "now".
    pub fn step(&mut self, minutes: i64, value: f64) {
        self.now_ms += minutes * MIN;
        self.reading(value, 0);
    }

    pub fn advance(&mut self, minutes: i64) {
        self.now_ms += minutes * MIN;
    }
}

impl GlucoseSourcePort for MockEnv {
    fn recent_samples(&mut self, now_ms: i64, window_minutes: u32) -> Vec<GlucoseSample> {
        let oldest = now_ms - i64::from(window_minutes) * MIN;
        self.samples
            .iter()
            .rev()
            .filter(|s| s.timestamp_ms <= now_ms && s.timestamp_ms >= oldest)
            .copied()
            .collect()
    }

    fn sensor_capabilities(&self) -> SensorCapabilities {
        self.sensor
    }
}

impl PumpStatusPort for MockEnv {
    fn pump_capabilities(&mut self) -> PumpCapabilities {
        self.pump
    }
}

impl ProfilePort for MockEnv {
    fn active_profile(&self) -> Option<Profile> {
        self.profile.clone()
    }
}

impl ClockPort for MockEnv {
    fn now_ms(&self) -> i64 {
        self.now_ms
    }

    fn utc_offset_ms(&self) -> i64 {
        self.utc_offset_ms
    }
}

// ── RecordingSink ─────────────────────────────────────────────

pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── FailingStore ──────────────────────────────────────────────

/// Storage whose writes can be switched off through a shared switch,
/// simulating a full backend after the store has been handed over.
pub struct FailingStore {
    data: HashMap<String, Vec<u8>>,
    fail_writes: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FailingStore {
    /// The store plus the switch that makes its writes fail.
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let switch = Arc::new(AtomicBool::new(false));
        let store = Self {
            data: HashMap::new(),
            fail_writes: Arc::clone(&switch),
        };
        (store, switch)
    }
}

impl StoragePort for FailingStore {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.data.get(&format!("{ns}::{key}")) {
            Some(v) if v.len() > buf.len() => Err(StorageError::Corrupted),
            Some(v) => {
                buf[..v.len()].copy_from_slice(v);
                Ok(v.len())
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Full);
        }
        self.data.insert(format!("{ns}::{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&format!("{ns}::{key}"));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{ns}::{key}"))
    }
}
