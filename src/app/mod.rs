//! Application core: decision logic, zero I/O.
//!
//! This module wires the trend calculator, the constraint aggregator and
//! the operating-mode controller into one loop cycle. All interaction with
//! the CGM, pump driver, profile store and storage happens through **port
//! traits** defined in [`ports`], keeping this layer testable with mock
//! adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
