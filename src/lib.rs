//! Decision core of an automated insulin delivery loop.
//!
//! Three pure-logic engines behind hexagonal ports:
//!
//! - [`glucose`]: trend calculator over an irregular CGM stream;
//! - [`constraints`]: constraint-narrowing engine with provenance;
//! - [`mode`]: operating-mode state machine with an append-only record arena.
//!
//! [`app::service::LoopService`] wires them into one loop cycle.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod constraints;
pub mod error;
pub mod glucose;
pub mod mode;
pub mod objectives;
pub mod profile;

pub use error::{Error, ModeChangeError};
