//! Error types for the decision core.
//!
//! Each subsystem has its own enum; the crate-level [`Error`] funnels them
//! so callers that only want to log or bail can use one type. Port errors
//! ([`ConfigError`], [`StorageError`]) live next to their ports.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};
use crate::mode::{ModeTarget, OperatingMode};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ModeChange(ModeChangeError),
    Config(ConfigError),
    Storage(StorageError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModeChange(e) => write!(f, "mode change: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ModeChangeError> for Error {
    fn from(e: ModeChangeError) -> Self {
        Self::ModeChange(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Mode change rejections
// ---------------------------------------------------------------------------

/// Why a mode-change request was turned down. The `Display` text is the
/// comment shown to whoever asked.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeChangeError {
    /// No profile is active; the loop cannot run without one.
    NoProfile,
    /// Target not reachable from the current mode.
    NotAllowed {
        current: OperatingMode,
        target: ModeTarget,
        reason: String,
    },
    /// Temporary mode without a usable planned duration.
    DurationTooShort {
        mode: OperatingMode,
        requested: Option<u32>,
        minimum: u32,
    },
    /// Accepted, but the record could not be stored; the mode is unchanged.
    Persistence(StorageError),
}

impl fmt::Display for ModeChangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProfile => write!(f, "no active profile"),
            Self::NotAllowed {
                current,
                target,
                reason,
            } => write!(f, "{target} not allowed from {current}: {reason}"),
            Self::DurationTooShort {
                mode,
                requested: None,
                minimum,
            } => write!(f, "{mode} needs a duration longer than {minimum} min"),
            Self::DurationTooShort {
                mode,
                requested: Some(d),
                minimum,
            } => write!(f, "{mode} needs more than {minimum} min, got {d} min"),
            Self::Persistence(e) => write!(f, "mode change not recorded: {e}"),
        }
    }
}

impl std::error::Error for ModeChangeError {}

impl From<StorageError> for ModeChangeError {
    fn from(e: StorageError) -> Self {
        Self::Persistence(e)
    }
}
