//! Single-writer wrapper around [`ModeController`].
//!
//! A transition holds the lock across validation and the record write, so
//! two concurrent requests are applied one after the other, each seeing
//! the mode the previous one left. Readers take a [`ModeSnapshot`] under the
//! same lock and never observe a half-applied transition.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::constraints::{ConstraintAggregator, ConstraintContext};
use crate::error::ModeChangeError;

use super::{ModeChange, ModeChangeRequest, ModeController, ModeHistory, ModeRecord, OperatingMode};

/// Consistent view of the controller at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSnapshot {
    pub mode: OperatingMode,
    pub active_record: Option<ModeRecord>,
    /// End of the active temporary mode.
    pub expires_at_ms: Option<i64>,
}

pub struct SharedModeController<H: ModeHistory> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<ModeController<H>>>,
}

impl<H: ModeHistory> SharedModeController<H> {
    pub fn new(controller: ModeController<H>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(controller)),
        }
    }

    pub fn request(
        &self,
        request: &ModeChangeRequest,
        aggregator: &ConstraintAggregator,
        ctx: &ConstraintContext<'_>,
    ) -> Result<ModeChange, ModeChangeError> {
        self.inner.lock(|c| {
            c.borrow_mut()
                .handle_running_mode_change(request, aggregator, ctx)
        })
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.inner.lock(|c| c.borrow().snapshot())
    }

    pub fn current(&self) -> OperatingMode {
        self.inner.lock(|c| c.borrow().current())
    }

    /// Run `f` with exclusive access to the controller.
    pub fn with<R>(&self, f: impl FnOnce(&mut ModeController<H>) -> R) -> R {
        self.inner.lock(|c| f(&mut c.borrow_mut()))
    }

    pub fn into_inner(self) -> ModeController<H> {
        self.inner.into_inner().into_inner()
    }
}
