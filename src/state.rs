//! Shared, process-wide system state.
//!
//! Constructed once at startup and handed to every component through the
//! [`Context`](crate::component::Context).  Connectivity flags follow the
//! bus; the scheduler writes load and uptime; the core component raises the
//! restart request.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::app::ports::LinkInfo;
use crate::component::ComponentId;
use crate::events::{ConnectivityKind, Event, EventKind, MessageBus, Subscriptions};

#[derive(Default)]
struct StateInner {
    wifi_connected: Cell<bool>,
    mqtt_connected: Cell<bool>,
    access_point_active: Cell<bool>,
    cpu_load: Cell<u8>,
    uptime_ms: Cell<u64>,
    restart_requested: Cell<bool>,
    components: RefCell<Vec<ComponentId>>,
    link: RefCell<Option<LinkInfo>>,
}

/// Cheaply cloneable handle.
#[derive(Clone, Default)]
pub struct SystemState {
    inner: Rc<StateInner>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track connectivity events.  The returned guard keeps the
    /// subscription alive.
    pub fn attach(&self, bus: &MessageBus) -> Subscriptions {
        let subs = Subscriptions::new(bus);
        let state = self.clone();
        subs.listen(EventKind::Connectivity, move |event| {
            if let Event::Connectivity { kind, connected } = event {
                let flag = match kind {
                    ConnectivityKind::Wifi => &state.inner.wifi_connected,
                    ConnectivityKind::Mqtt => &state.inner.mqtt_connected,
                    ConnectivityKind::AccessPoint => &state.inner.access_point_active,
                };
                flag.set(*connected);
                if *kind == ConnectivityKind::Wifi && !*connected {
                    state.set_link(None);
                }
            }
        });
        subs
    }

    pub fn wifi_connected(&self) -> bool {
        self.inner.wifi_connected.get()
    }

    pub fn mqtt_connected(&self) -> bool {
        self.inner.mqtt_connected.get()
    }

    pub fn access_point_active(&self) -> bool {
        self.inner.access_point_active.get()
    }

    /// Rolling CPU load estimate, percent.
    pub fn cpu_load(&self) -> u8 {
        self.inner.cpu_load.get()
    }

    pub fn set_cpu_load(&self, load: u8) {
        self.inner.cpu_load.set(load);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.inner.uptime_ms.get()
    }

    pub fn set_uptime_ms(&self, ms: u64) {
        self.inner.uptime_ms.set(ms);
    }

    /// Registered component ids in iteration order.
    pub fn components(&self) -> Vec<ComponentId> {
        self.inner.components.borrow().clone()
    }

    pub fn set_components(&self, ids: Vec<ComponentId>) {
        *self.inner.components.borrow_mut() = ids;
    }

    /// Station link details, refreshed by the WiFi component.
    pub fn link(&self) -> Option<LinkInfo> {
        self.inner.link.borrow().clone()
    }

    pub fn set_link(&self, link: Option<LinkInfo>) {
        *self.inner.link.borrow_mut() = link;
    }

    pub fn restart_requested(&self) -> bool {
        self.inner.restart_requested.get()
    }

    pub fn request_restart(&self) {
        self.inner.restart_requested.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_connectivity_events() {
        let bus = MessageBus::new();
        let state = SystemState::new();
        let _subs = state.attach(&bus);

        bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Wifi,
            connected: true,
        });
        bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::AccessPoint,
            connected: true,
        });
        assert!(state.wifi_connected());
        assert!(state.access_point_active());
        assert!(!state.mqtt_connected());

        bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Wifi,
            connected: false,
        });
        assert!(!state.wifi_connected());
    }

    #[test]
    fn detached_after_guard_drop() {
        let bus = MessageBus::new();
        let state = SystemState::new();
        drop(state.attach(&bus));
        bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Mqtt,
            connected: true,
        });
        assert!(!state.mqtt_connected());
    }
}
