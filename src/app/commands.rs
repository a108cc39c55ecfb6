//! Inbound commands to the loop service.
//!
//! These represent actions requested by the outside world (UI, automation,
//! remote follower) that the [`LoopService`](super::service::LoopService)
//! interprets and answers synchronously with a [`CommandReply`].

use crate::config::SystemConfig;
use crate::mode::ModeChangeRequest;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Ask for an operating-mode transition.
    ChangeMode(ModeChangeRequest),

    /// Replace the preferences after validation.
    UpdateConfig(SystemConfig),

    /// Persist the current preferences on the next save check.
    SaveConfig,
}

/// Synchronous answer: did it work, and a sentence saying why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub success: bool,
    pub comment: String,
}

impl CommandReply {
    pub fn ok(comment: impl Into<String>) -> Self {
        Self {
            success: true,
            comment: comment.into(),
        }
    }

    pub fn rejected(comment: impl Into<String>) -> Self {
        Self {
            success: false,
            comment: comment.into(),
        }
    }
}
