//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters. All tests run on the host with no pump or CGM
//! attached.

mod loop_service_tests;
mod mock_env;
mod mode_flow_tests;
