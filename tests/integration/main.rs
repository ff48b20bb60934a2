//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through [`AppService`](modhub::app::service::AppService) against the
//! simulation radio and broker.  All tests run on the host with no real
//! hardware required.

mod connectivity_tests;
mod mock_hw;
mod registry_tests;
mod restart_flow_tests;
mod settings_tests;
