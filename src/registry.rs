//! Component registry.
//!
//! The registry is the exclusive owner of every live component.  Components
//! are built on demand by a [`ComponentFactory`] and dropped on removal.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Registry                                               │
//! │    entries: [core] [log] [wifi] [mqtt]   (insertion)    │
//! │    for_each:  mqtt → wifi → log → core   (reverse)      │
//! │                                                         │
//! │  remove(id) ── drop(Box<dyn Component>) ──▶ bus token   │
//! │                                   must own nothing      │
//! └─────────────────────────────────────────────────────────┘
//! ```

use log::{info, warn};

use crate::component::{Component, ComponentId, Context};

/// Builds components by id.
pub trait ComponentFactory {
    /// `None` for an id this factory does not know.
    fn create(&mut self, id: &ComponentId, ctx: &Context) -> Option<Box<dyn Component>>;
}

impl<F> ComponentFactory for F
where
    F: FnMut(&ComponentId, &Context) -> Option<Box<dyn Component>>,
{
    fn create(&mut self, id: &ComponentId, ctx: &Context) -> Option<Box<dyn Component>> {
        self(id, ctx)
    }
}

struct Entry {
    id: ComponentId,
    component: Box<dyn Component>,
}

pub struct Registry {
    entries: Vec<Entry>,
    factory: Box<dyn ComponentFactory>,
    ctx: Context,
}

impl Registry {
    pub fn new(factory: impl ComponentFactory + 'static, ctx: Context) -> Self {
        Self {
            entries: Vec::new(),
            factory: Box::new(factory),
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Construct and store `id`.  No-op when it is already live, invalid or
    /// unknown to the factory.  Returns whether a component was added.
    pub fn add(&mut self, id: &str) -> bool {
        let Some(id) = ComponentId::new(id) else {
            warn!("Registry: invalid component id '{}'", id);
            return false;
        };
        if self.contains(id.as_str()) {
            return false;
        }
        let Some(component) = self.factory.create(&id, &self.ctx) else {
            warn!("Registry: unknown component '{}'", id);
            return false;
        };
        info!("Registry: added '{}' ({})", id, component.name());
        self.entries.push(Entry { id, component });
        self.publish_ids();
        true
    }

    /// Drop `id`.  Returns whether a component was removed.
    ///
    /// # Panics
    ///
    /// When the dropped component left subscriptions behind on its bus
    /// token; later deliveries would reach freed state.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = self.entries.remove(pos);
        let token = entry.component.subscription_token();
        drop(entry);
        if let Some(token) = token {
            assert!(
                !self.ctx.bus.has_subscriptions(token),
                "component '{}' dropped with live bus subscriptions",
                id
            );
        }
        info!("Registry: removed '{}'", id);
        self.publish_ids();
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Component> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.component.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut (dyn Component + 'static)> {
        self.entries
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| e.component.as_mut())
    }

    /// Run `f` on `id` if it is live.
    pub fn execute<R>(&mut self, id: &str, f: impl FnOnce(&mut dyn Component) -> R) -> Option<R> {
        self.get_mut(id).map(|c| f(c))
    }

    /// Visit every component, most recently added first.
    pub fn for_each(&mut self, mut f: impl FnMut(&mut dyn Component)) {
        for entry in self.entries.iter_mut().rev() {
            f(entry.component.as_mut());
        }
    }

    /// Ids in iteration order.
    pub fn ids(&self) -> Vec<ComponentId> {
        self.entries.iter().rev().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn publish_ids(&self) {
        self.ctx.state.set_components(self.ids());
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Newest first, mirroring iteration order.
        while let Some(entry) = self.entries.pop() {
            drop(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::adapters::nvs::NvsAdapter;
    use crate::component::Capabilities;
    use crate::events::{ConnectivityKind, Event, EventKind, MessageBus, Subscriptions, Token};
    use crate::settings::Settings;
    use crate::state::SystemState;

    struct Sensor {
        id: ComponentId,
        subs: Option<Subscriptions>,
        leaked: Option<Token>,
    }

    impl Component for Sensor {
        fn id(&self) -> &ComponentId {
            &self.id
        }
        fn name(&self) -> &str {
            "Sensor"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        fn subscription_token(&self) -> Option<Token> {
            self.subs.as_ref().map(Subscriptions::token).or(self.leaked)
        }
    }

    fn ctx() -> Context {
        let settings = Settings::new(Box::new(NvsAdapter::new().unwrap()), 1);
        Context::new(MessageBus::new(), settings, SystemState::new())
    }

    fn sensor_factory(hits: Rc<Cell<u32>>) -> impl ComponentFactory {
        move |id: &ComponentId, ctx: &Context| -> Option<Box<dyn Component>> {
            if id.as_str() == "bogus" {
                return None;
            }
            let subs = Subscriptions::new(&ctx.bus);
            let hits = hits.clone();
            subs.listen(EventKind::Connectivity, move |_| hits.set(hits.get() + 1));
            Some(Box::new(Sensor {
                id: id.clone(),
                subs: Some(subs),
                leaked: None,
            }))
        }
    }

    #[test]
    fn add_is_idempotent() {
        let hits = Rc::new(Cell::new(0));
        let mut reg = Registry::new(sensor_factory(hits.clone()), ctx());
        assert!(reg.add("a"));
        assert!(!reg.add("a"));
        assert_eq!(reg.len(), 1);

        reg.context().bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Wifi,
            connected: true,
        });
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn iteration_is_reverse_insertion() {
        let mut reg = Registry::new(sensor_factory(Rc::default()), ctx());
        for id in ["a", "b", "c"] {
            reg.add(id);
        }
        let mut seen = Vec::new();
        reg.for_each(|c| seen.push(c.id().to_string()));
        assert_eq!(seen, ["c", "b", "a"]);
        let ids: Vec<String> = reg
            .context()
            .state
            .components()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn unknown_and_invalid_ids_are_ignored() {
        let mut reg = Registry::new(sensor_factory(Rc::default()), ctx());
        assert!(!reg.add("bogus"));
        assert!(!reg.add("much-too-long"));
        assert!(!reg.remove("nothing"));
        assert!(reg.get("nothing").is_none());
        assert_eq!(reg.execute("nothing", |_| 1), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn removal_revokes_subscriptions() {
        let hits = Rc::new(Cell::new(0));
        let mut reg = Registry::new(sensor_factory(hits.clone()), ctx());
        reg.add("a");
        let bus = reg.context().bus.clone();
        assert!(reg.remove("a"));
        bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Mqtt,
            connected: false,
        });
        assert_eq!(hits.get(), 0);
        assert_eq!(bus.subscriber_count(EventKind::Connectivity), 0);
    }

    #[test]
    #[should_panic(expected = "live bus subscriptions")]
    fn removal_with_leaked_subscription_panics() {
        let factory = |id: &ComponentId, ctx: &Context| -> Option<Box<dyn Component>> {
            let token = ctx.bus.subscribe(EventKind::LogUpdate, |_| {});
            Some(Box::new(Sensor {
                id: id.clone(),
                subs: None,
                leaked: Some(token),
            }))
        };
        let mut reg = Registry::new(factory, ctx());
        reg.add("leaky");
        reg.remove("leaky");
    }

    #[test]
    fn execute_reaches_sibling() {
        let mut reg = Registry::new(sensor_factory(Rc::default()), ctx());
        reg.add("a");
        assert_eq!(reg.execute("a", |c| c.name().to_owned()).as_deref(), Some("Sensor"));
    }
}
