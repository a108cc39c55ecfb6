//! Port traits: the hexagonal boundary between decision logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ LoopService (domain)
//! ```
//!
//! Driven adapters (CGM, pump driver, profile store, clock, storage,
//! event sinks) implement these traits. The
//! [`LoopService`](super::service::LoopService) consumes them via generics,
//! so the decision core never touches a device or a database directly.
//!
//! ## Safety notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **StoragePort** writes back the mode history; a failed write is
//!   reported to the requester, never swallowed.
//! - All port errors are typed; callers must handle every variant explicitly.

use core::fmt;

use crate::config::SystemConfig;
use crate::constraints::{PumpCapabilities, SensorCapabilities};
use crate::glucose::GlucoseSample;
use crate::profile::Profile;

// ───────────────────────────────────────────────────────────────
// Glucose source port (CGM → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port for CGM data.
pub trait GlucoseSourcePort {
    /// Samples not older than `window_minutes` before `now_ms`, most
    /// recent first. Artifacts may be included; the trend calculator
    /// filters them.
    fn recent_samples(&mut self, now_ms: i64, window_minutes: u32) -> Vec<GlucoseSample>;

    /// What the active glucose source can do.
    fn sensor_capabilities(&self) -> SensorCapabilities;
}

// ───────────────────────────────────────────────────────────────
// Pump status port (pump driver → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port for the pump driver. Delivery itself is out of scope.
pub trait PumpStatusPort {
    fn pump_capabilities(&mut self) -> PumpCapabilities;
}

// ───────────────────────────────────────────────────────────────
// Profile port
// ───────────────────────────────────────────────────────────────

/// Source of the therapy profile currently in effect.
pub trait ProfilePort {
    /// `None` when no profile has been activated yet.
    fn active_profile(&self) -> Option<Profile>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall clock in epoch milliseconds plus the local UTC offset.
pub trait ClockPort {
    fn now_ms(&self) -> i64;
    fn utc_offset_ms(&self) -> i64;
}

/// Everything one loop cycle reads. Blanket-implemented, so a single
/// adapter (or mock) satisfying the four ports can be passed as one
/// `&mut` without double borrows.
pub trait LoopEnvironment: GlucoseSourcePort + PumpStatusPort + ProfilePort + ClockPort {}

impl<T: GlucoseSourcePort + PumpStatusPort + ProfilePort + ClockPort> LoopEnvironment for T {}

// ───────────────────────────────────────────────────────────────
// Objective gate
// ───────────────────────────────────────────────────────────────

/// Features unlocked by completing onboarding objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatedFeature {
    OpenLoop,
    Lgs,
    ClosedLoop,
    Autosens,
    Smb,
}

/// Why a gated feature is still locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateBlocked {
    /// 1-based index of the first unfinished objective.
    pub objective: usize,
    pub title: String,
}

impl fmt::Display for GateBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "objective {} not completed: {}", self.objective, self.title)
    }
}

/// Progression gate consulted by the objectives constraint source and by
/// the mode controller.
pub trait ObjectiveGate {
    fn check(&self, feature: GatedFeature, now_ms: i64) -> Result<(), GateBlocked>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go (log, UI, uploader).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists the user preferences.
///
/// # Safety of stored values
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped, so a corrupted import cannot raise a dosing
/// ceiling past its documented range.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value storage backing the mode history and config.
///
/// Write operations MUST be atomic per key: a record is either fully
/// stored or absent.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first start).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Value did not fit the caller's buffer or failed to (de)serialize.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
        }
    }
}
