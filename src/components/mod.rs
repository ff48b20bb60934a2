//! Built-in components and the factory that constructs them.
//!
//! | Id     | Component         | Hooks                       |
//! |--------|-------------------|-----------------------------|
//! | `core` | [`CoreComponent`] | tick (phases 0, 6), upload  |
//! | `log`  | [`LogComponent`]  | tick (phase 3)              |
//! | `wifi` | [`WifiComponent`] | tick (phase 6)              |
//! | `mqtt` | [`MqttComponent`] | pump, tick (phase 9)        |
//!
//! Optional components are registered with [`BuiltinFactory::with_optional`];
//! `core` exposes one boolean option per optional id to add or remove it at
//! runtime.

pub mod core;
pub mod log;
pub mod mqtt;
pub mod wifi;

pub use self::core::CoreComponent;
pub use self::log::LogComponent;
pub use self::mqtt::MqttComponent;
pub use self::wifi::WifiComponent;

use crate::adapters::log_sink::LogRing;
use crate::app::ports::{MqttTransport, WifiRadio};
use crate::component::{Component, ComponentId, Context};
use crate::config;
use crate::registry::ComponentFactory;

type RadioCtor = Box<dyn FnMut() -> Box<dyn WifiRadio>>;
type TransportCtor = Box<dyn FnMut() -> Box<dyn MqttTransport>>;
type OptionalCtor = Box<dyn FnMut(&ComponentId, &Context) -> Box<dyn Component>>;

/// Constructs the built-in components plus any registered optional ones.
pub struct BuiltinFactory {
    radio: RadioCtor,
    transport: TransportCtor,
    log_ring: LogRing,
    optional: Vec<(ComponentId, OptionalCtor)>,
}

impl BuiltinFactory {
    pub fn new(
        radio: impl FnMut() -> Box<dyn WifiRadio> + 'static,
        transport: impl FnMut() -> Box<dyn MqttTransport> + 'static,
        log_ring: LogRing,
    ) -> Self {
        Self {
            radio: Box::new(radio),
            transport: Box::new(transport),
            log_ring,
            optional: Vec::new(),
        }
    }

    /// Register an optional component.  Ignored for invalid or built-in ids.
    #[must_use]
    pub fn with_optional(
        mut self,
        id: &str,
        ctor: impl FnMut(&ComponentId, &Context) -> Box<dyn Component> + 'static,
    ) -> Self {
        match ComponentId::new(id) {
            Some(id) if !is_builtin(id.as_str()) => self.optional.push((id, Box::new(ctor))),
            _ => ::log::warn!("Registry: '{}' cannot be an optional component", id),
        }
        self
    }

    pub fn optional_ids(&self) -> Vec<ComponentId> {
        self.optional.iter().map(|(id, _)| id.clone()).collect()
    }
}

fn is_builtin(id: &str) -> bool {
    [config::CORE_ID, config::LOG_ID, config::WIFI_ID, config::MQTT_ID].contains(&id)
}

impl ComponentFactory for BuiltinFactory {
    fn create(&mut self, id: &ComponentId, ctx: &Context) -> Option<Box<dyn Component>> {
        let component: Box<dyn Component> = match id.as_str() {
            config::CORE_ID => Box::new(CoreComponent::new(ctx, self.optional_ids())),
            config::LOG_ID => Box::new(LogComponent::new(ctx, self.log_ring.clone())),
            config::WIFI_ID => Box::new(WifiComponent::new(ctx, (self.radio)())),
            config::MQTT_ID => Box::new(MqttComponent::new(ctx, (self.transport)())),
            other => {
                let (id, ctor) = self.optional.iter_mut().find(|(id, _)| id == other)?;
                ctor(&*id, ctx)
            }
        };
        Some(component)
    }
}
