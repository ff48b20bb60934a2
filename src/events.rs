//! Synchronous in-process message bus.
//!
//! Components never call each other directly; they announce state changes
//! on the bus and react to what others announce.
//!
//! ```text
//! ┌─────────────┐  publish   ┌──────────────┐  callback  ┌─────────────┐
//! │ wifi        │───────────▶│              │───────────▶│ mqtt        │
//! │ mqtt        │───────────▶│  MessageBus  │───────────▶│ core        │
//! │ dispatcher  │───────────▶│  (by kind)   │───────────▶│ SystemState │
//! └─────────────┘            └──────────────┘            └─────────────┘
//! ```
//!
//! Delivery happens before `publish` returns, in subscription order.  A
//! callback may publish again (re-entrant) and may unsubscribe anything,
//! including itself.  Subscribers added during an in-flight publish do not
//! see that publish.
//!
//! Every subscription belongs to a [`Token`].  A component owns exactly one
//! token through a [`Subscriptions`] guard, and dropping the guard revokes
//! every subscription made under it.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::component::ComponentId;

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Which link a [`Event::Connectivity`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityKind {
    Wifi,
    Mqtt,
    AccessPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEventKind {
    /// A device restart has been requested and is waiting out its grace period.
    PendingRestart,
}

/// The closed set of notifications carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connectivity {
        kind: ConnectivityKind,
        connected: bool,
    },
    StatusChanged {
        source: ComponentId,
        payload: String,
    },
    CommandResponse {
        source: ComponentId,
        topic: String,
        payload: String,
    },
    System(SystemEventKind),
    LogUpdate,
}

/// Discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connectivity,
    StatusChanged,
    CommandResponse,
    System,
    LogUpdate,
}

impl Event {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connectivity { .. } => EventKind::Connectivity,
            Self::StatusChanged { .. } => EventKind::StatusChanged,
            Self::CommandResponse { .. } => EventKind::CommandResponse,
            Self::System(_) => EventKind::System,
            Self::LogUpdate => EventKind::LogUpdate,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Owner handle grouping a set of subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u32);

type Callback = Rc<dyn Fn(&Event)>;

struct Subscription {
    id: u64,
    token: Token,
    kind: EventKind,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    next_token: u32,
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl BusInner {
    fn is_live(&self, id: u64) -> bool {
        self.subscriptions.iter().any(|s| s.id == id)
    }
}

/// Cheaply cloneable handle to the one bus of the process.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Rc<RefCell<BusInner>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh token with no subscriptions.
    pub fn new_token(&self) -> Token {
        let mut inner = self.inner.borrow_mut();
        inner.next_token = inner.next_token.wrapping_add(1);
        Token(inner.next_token)
    }

    /// Subscribe under a new token.
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&Event) + 'static) -> Token {
        let token = self.new_token();
        self.subscribe_with(token, kind, callback);
        token
    }

    /// Subscribe under an existing token.
    pub fn subscribe_with(
        &self,
        token: Token,
        kind: EventKind,
        callback: impl Fn(&Event) + 'static,
    ) {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscriptions.push(Subscription {
            id,
            token,
            kind,
            callback: Rc::new(callback),
        });
    }

    /// Remove one subscription of `token` for `kind` (the oldest).
    pub fn unsubscribe(&self, token: Token, kind: EventKind) {
        let mut inner = self.inner.borrow_mut();
        if let Some(pos) = inner
            .subscriptions
            .iter()
            .position(|s| s.token == token && s.kind == kind)
        {
            inner.subscriptions.remove(pos);
        }
    }

    /// Remove every subscription owned by `token`.
    pub fn unsubscribe_all(&self, token: Token) {
        self.inner
            .borrow_mut()
            .subscriptions
            .retain(|s| s.token != token);
    }

    pub fn has_subscriptions(&self, token: Token) -> bool {
        self.inner
            .borrow()
            .subscriptions
            .iter()
            .any(|s| s.token == token)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Deliver `event` to every live subscriber of its kind.
    pub fn publish(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot, then release the borrow so callbacks may re-enter.
        let targets: Vec<(u64, Callback)> = self
            .inner
            .borrow()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, Rc::clone(&s.callback)))
            .collect();
        trace!("Bus: {:?} -> {} subscriber(s)", kind, targets.len());

        for (id, callback) in targets {
            // Revoked by an earlier callback of this same publish.
            if !self.inner.borrow().is_live(id) {
                continue;
            }
            callback(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Token guard
// ---------------------------------------------------------------------------

/// Owns one token; revokes all of its subscriptions on drop.
pub struct Subscriptions {
    bus: MessageBus,
    token: Token,
}

impl Subscriptions {
    pub fn new(bus: &MessageBus) -> Self {
        Self {
            bus: bus.clone(),
            token: bus.new_token(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn listen(&self, kind: EventKind, callback: impl Fn(&Event) + 'static) {
        self.bus.subscribe_with(self.token, kind, callback);
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.bus.unsubscribe_all(self.token);
    }
}
