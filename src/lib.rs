//! modhub runtime library.
//!
//! Component registry, cooperative scheduler, message bus, settings
//! protocol and the WiFi/MQTT connectivity components.  Exposed as a
//! library for the integration tests and the fuzz targets.  All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds run against simulation adapters.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod component;
pub mod components;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fsm;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod upload;
