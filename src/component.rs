//! The component contract.
//!
//! A component is a unit of firmware behaviour with an identity, a set of
//! capability flags and a lifecycle bounded by its registry entry.  The
//! registry constructs it through a [`ComponentFactory`](crate::registry::ComponentFactory)
//! and drops it on removal; the drop must revoke every bus subscription the
//! component made (see [`Subscriptions`](crate::events::Subscriptions)).
//!
//! ```text
//!   Scheduler ──pump()/tick(phase)──▶ Component ◀──handle_option()── Dispatcher
//!                                        │
//!                                        └──publish()──▶ MessageBus
//! ```

use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::dispatch;
use crate::error::Outcome;
use crate::events::{MessageBus, Token};
use crate::settings::{Settings, SettingsAction};
use crate::state::SystemState;

/// Maximum length of a component identifier.
pub const MAX_ID_LEN: usize = 9;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Short printable identifier, unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId(heapless::String<MAX_ID_LEN>);

impl ComponentId {
    /// `None` when `id` is empty, too long or contains non-printable or
    /// whitespace characters.
    pub fn new(id: &str) -> Option<Self> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_graphic()) {
            return None;
        }
        let mut s = heapless::String::new();
        s.push_str(id).ok()?;
        Some(Self(s))
    }

    /// Identifier for compile-time constants.  Truncates rather than fails.
    pub fn from_static(id: &'static str) -> Self {
        let mut s = heapless::String::new();
        for c in id.chars().take(MAX_ID_LEN) {
            if s.push(c).is_err() {
                break;
            }
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for ComponentId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ComponentId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

// ---------------------------------------------------------------------------
// Capabilities and tick phase
// ---------------------------------------------------------------------------

/// Which hooks the scheduler and the web boundary invoke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub needs_poll_pump: bool,
    pub needs_periodic_tick: bool,
    pub exposes_config_page: bool,
    pub exposes_status_page: bool,
}

/// Position within the 1-second cycle of ten 100 ms ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickPhase(u8);

impl TickPhase {
    pub const COUNT: u8 = 10;

    /// `None` unless `phase < 10`.
    pub const fn new(phase: u8) -> Option<Self> {
        if phase < Self::COUNT {
            Some(Self(phase))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % Self::COUNT)
    }

    pub const fn is(self, phase: u8) -> bool {
        self.0 == phase
    }
}

// ---------------------------------------------------------------------------
// Deferred requests
// ---------------------------------------------------------------------------

/// Registry mutation or command requested from inside a component or bus
/// callback.  Applied by the service between scheduler iterations, never
/// while the registry is being iterated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add(ComponentId),
    Remove(ComponentId),
    /// Route a `"<target> <verb> [args]"` or `"<verb> [args]"` command.
    Command(String),
    /// Apply a JSON options object to `target` through `set_string("Import")`.
    Import { target: ComponentId, data: String },
}

/// FIFO of [`Request`]s shared by everything that holds a [`Context`].
#[derive(Clone, Default)]
pub struct RequestQueue {
    inner: Rc<RefCell<VecDeque<Request>>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: Request) {
        self.inner.borrow_mut().push_back(request);
    }

    pub fn pop(&self) -> Option<Request> {
        self.inner.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

/// Handles every component receives at construction.
#[derive(Clone)]
pub struct Context {
    pub bus: MessageBus,
    pub settings: Settings,
    pub state: SystemState,
    pub requests: RequestQueue,
}

impl Context {
    pub fn new(bus: MessageBus, settings: Settings, state: SystemState) -> Self {
        Self {
            bus,
            settings,
            state,
            requests: RequestQueue::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A registrable unit of behaviour.
///
/// Every hook must return promptly: the scheduler is cooperative and a
/// blocking component stalls the whole device.
pub trait Component {
    fn id(&self) -> &ComponentId;

    /// Human-readable display name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Bus token owning this component's subscriptions, if it has any.
    /// The registry checks it was revoked once the component is dropped.
    fn subscription_token(&self) -> Option<Token> {
        None
    }

    /// Non-blocking I/O step, every scheduler iteration.
    fn pump(&mut self) {}

    /// Periodic work, every 100 ms.
    fn tick(&mut self, _phase: TickPhase) {}

    /// Re-read configuration after an `OkReinit` settings change.
    fn reinit(&mut self) {}

    /// Free-form command handler.  `Some(result)` means handled.
    fn handle_command(&mut self, _verb: &str, _args: &str) -> Option<String> {
        None
    }

    /// Three-phase option handler.  `Verify` must not mutate anything.
    fn handle_option(&mut self, _key: &str, _value: &str, _action: SettingsAction) -> Outcome {
        Outcome::unknown_option()
    }

    /// Generic accessor used for bulk export.  Must be side-effect-free.
    fn get_string(&mut self, _key: &str) -> Option<String> {
        None
    }

    /// Generic mutator used for bulk import.  `Import` applies a JSON
    /// options object with `Save`.
    fn set_string(&mut self, key: &str, value: &str) -> Outcome {
        if key == crate::config::KEY_IMPORT {
            dispatch::import_options(value, |k, v, action| self.handle_option(k, v, action))
        } else {
            Outcome::unknown_command()
        }
    }

    fn upload_begin(&mut self, _action: &str, _size: usize) -> Outcome {
        Outcome::unknown_command()
    }

    fn upload_block(&mut self, _data: &[u8]) -> Outcome {
        Outcome::unknown_command()
    }

    fn upload_end(&mut self, _success: bool) -> Outcome {
        Outcome::unknown_command()
    }
}
