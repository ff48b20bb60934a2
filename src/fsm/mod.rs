//! Connectivity state machines.
//!
//! Both machines are driven once per second from a scheduler tick phase and
//! talk to the radio / broker only through port traits, so they run
//! unchanged against the simulation adapters and the test mocks:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  WifiStateMachine<R: WifiRadio>                              │
//! │    Idle ─▶ Connecting(profile) ─▶ Connected                  │
//! │                 │ budget spent                               │
//! │                 ▼                                            │
//! │            Reconfiguring ─▶ restart | ApManagerMode | retry  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  MqttStateMachine<T: MqttTransport>                          │
//! │    Disconnected ─reconnect()─▶ Connecting ─SubAck─▶ Connected│
//! │         ▲                                            │       │
//! │         └──────────────── Closed ◀───────────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither machine touches the bus.  Reachability changes are buffered as
//! [`Event`](crate::events::Event)s and drained by the owning component
//! with `take_events()` after each step, outside any borrow of the machine.

pub mod mqtt;
pub mod wifi;

pub use mqtt::{MqttState, MqttStateMachine};
pub use wifi::{Profile, WifiState, WifiStateMachine};

/// Whole-second countdown.  `tick()` reports expiry exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown(u16);

impl Countdown {
    pub const fn new(secs: u16) -> Self {
        Self(secs)
    }

    pub fn set(&mut self, secs: u16) {
        self.0 = secs;
    }

    pub const fn remaining(self) -> u16 {
        self.0
    }

    pub const fn is_armed(self) -> bool {
        self.0 > 0
    }

    /// Decrement; `true` when this call took the counter to zero.
    pub fn tick(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        self.0 == 0
    }
}
