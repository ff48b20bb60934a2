//! Application core: the service that owns the component registry and
//! drives the main loop.
//!
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real radios,
//! brokers or flash.

pub mod commands;
pub mod ports;
pub mod service;
