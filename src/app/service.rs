//! Application service: the registry, the scheduler and the deferred
//! request queue wired into one main loop.
//!
//! [`AppService`] owns every live component through its [`Registry`].  All
//! external entry points (commands, web-form settings, uploads, exports)
//! come through here and are routed to one component at a time.
//!
//! ```text
//!   Clock, DelayNs ──▶ ┌───────────────────────────────┐
//!                      │          AppService            │
//!   route_command ───▶ │  Scheduler · Registry · Queue  │ ──▶ MessageBus
//!   upload_* ────────▶ └───────────────────────────────┘
//! ```
//!
//! Components never mutate the registry directly.  They push a [`Request`]
//! and the service applies it in [`AppService::drain_requests`], after the
//! scheduler has finished iterating.

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::component::{ComponentId, Context, Request};
use crate::config;
use crate::dispatch;
use crate::error::Outcome;
use crate::events::Subscriptions;
use crate::registry::{ComponentFactory, Registry};
use crate::scheduler::{Iteration, Scheduler};

use super::ports::Clock;

/// Upper bound on requests applied per drain.  Requests pushed while
/// draining beyond this are left for the next iteration.
const MAX_REQUESTS_PER_DRAIN: usize = 32;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

pub struct AppService<C: Clock, D: DelayNs> {
    registry: Registry,
    scheduler: Scheduler<C, D>,
    _state_subs: Subscriptions,
}

impl<C: Clock, D: DelayNs> AppService<C, D> {
    /// Construct the service.  No component exists until [`start`] runs.
    ///
    /// [`start`]: Self::start
    pub fn new(factory: impl ComponentFactory + 'static, ctx: Context, clock: C, delay: D) -> Self {
        let state_subs = ctx.state.attach(&ctx.bus);
        Self {
            registry: Registry::new(factory, ctx),
            scheduler: Scheduler::new(clock, delay),
            _state_subs: state_subs,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Add `ids` in order, then apply whatever their constructors queued.
    pub fn start(&mut self, ids: &[&str]) {
        for id in ids {
            if !self.registry.add(id) {
                warn!("AppService: '{}' was not started", id);
            }
        }
        self.drain_requests();
        info!("AppService: started {} component(s)", self.registry.len());
    }

    /// One main-loop iteration followed by the deferred requests it
    /// produced.
    pub fn run_once(&mut self) -> Iteration {
        let iteration = self.scheduler.step(&mut self.registry);
        self.drain_requests();
        iteration
    }

    /// Apply queued requests in FIFO order.  Returns how many were applied.
    pub fn drain_requests(&mut self) -> usize {
        let requests = self.registry.context().requests.clone();
        let mut applied = 0;
        while applied < MAX_REQUESTS_PER_DRAIN {
            let Some(request) = requests.pop() else {
                break;
            };
            self.apply(request);
            applied += 1;
        }
        if !requests.is_empty() {
            debug!("AppService: {} request(s) deferred", requests.len());
        }
        applied
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Add(id) => {
                self.registry.add(id.as_str());
            }
            Request::Remove(id) => {
                self.registry.remove(id.as_str());
            }
            Request::Command(command) => {
                self.route_command(&command);
            }
            Request::Import { target, data } => {
                self.import(&target, &data);
            }
        }
    }

    fn import(&mut self, target: &ComponentId, data: &str) {
        let bus = self.registry.context().bus.clone();
        let outcome = self.registry.execute(target.as_str(), |c| {
            let outcome = c.set_string(config::KEY_IMPORT, data);
            if outcome.is_success() {
                dispatch::escalate(c, &bus, outcome.code);
            }
            outcome
        });
        match outcome {
            Some(o) if o.is_error() => warn!("AppService: import into '{}' failed: {}", target, o),
            Some(o) => info!("AppService: imported '{}' ({})", target, o),
            None => warn!("AppService: import target '{}' is not running", target),
        }
    }

    // ── Entry points ──────────────────────────────────────────

    /// Route a `"<id> <verb> [args]"` or `"<verb> [args]"` command.
    pub fn route_command(&mut self, command: &str) -> Option<Outcome> {
        dispatch::route_command(&mut self.registry, command)
    }

    /// Apply a web-form batch to `id`.  `None` when `id` is not running.
    pub fn dispatch_settings(&mut self, id: &str, entries: &[(String, String)]) -> Option<Outcome> {
        let bus = self.registry.context().bus.clone();
        self.registry
            .execute(id, |c| dispatch::dispatch_settings(c, &bus, entries))
    }

    pub fn upload_begin(&mut self, id: &str, action: &str, size: usize) -> Outcome {
        self.registry
            .execute(id, |c| c.upload_begin(action, size))
            .unwrap_or_else(Outcome::unknown_command)
    }

    pub fn upload_block(&mut self, id: &str, data: &[u8]) -> Outcome {
        self.registry
            .execute(id, |c| c.upload_block(data))
            .unwrap_or_else(Outcome::unknown_command)
    }

    pub fn upload_end(&mut self, id: &str, success: bool) -> Outcome {
        self.registry
            .execute(id, |c| c.upload_end(success))
            .unwrap_or_else(Outcome::unknown_command)
    }

    /// Exported options of one component.
    pub fn export(&mut self, id: &str) -> Option<String> {
        self.registry
            .execute(id, |c| c.get_string(config::KEY_EXPORT))
            .flatten()
    }

    /// `{ "<id>": { <options> }, ... }` for every component that exports,
    /// the same document a configuration upload accepts.
    pub fn export_all(&mut self) -> String {
        let mut sections = Map::new();
        self.registry.for_each(|c| {
            let Some(text) = c.get_string(config::KEY_EXPORT) else {
                return;
            };
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    sections.insert(c.id().to_string(), value);
                }
                Err(e) => warn!("AppService: '{}' exported invalid JSON: {}", c.id(), e),
            }
        });
        Value::Object(sections).to_string()
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn context(&self) -> &Context {
        self.registry.context()
    }

    pub fn scheduler(&self) -> &Scheduler<C, D> {
        &self.scheduler
    }

    /// Set once a pending restart has waited out its grace period.
    pub fn restart_requested(&self) -> bool {
        self.registry.context().state.restart_requested()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::adapters::log_sink::LogRing;
    use crate::adapters::mqtt::SimTransport;
    use crate::adapters::nvs::NvsAdapter;
    use crate::adapters::wifi::SimRadio;
    use crate::component::{Capabilities, Component};
    use crate::components::BuiltinFactory;
    use crate::error::ResultCode;
    use crate::events::MessageBus;
    use crate::settings::{Settings, SettingsAction};
    use crate::state::SystemState;

    #[derive(Clone, Default)]
    struct FakeTime(Rc<Cell<u64>>);

    impl Clock for FakeTime {
        fn now_us(&self) -> u64 {
            self.0.get()
        }
    }

    impl DelayNs for FakeTime {
        fn delay_ns(&mut self, ns: u32) {
            self.0.set(self.0.get() + u64::from(ns) / 1000);
        }
    }

    struct Relay {
        id: ComponentId,
        ctx: Context,
        level: Rc<Cell<u8>>,
    }

    impl Component for Relay {
        fn id(&self) -> &ComponentId {
            &self.id
        }
        fn name(&self) -> &str {
            "Relay"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        fn handle_command(&mut self, verb: &str, _args: &str) -> Option<String> {
            // re-entrant request: must be applied after this call returns
            (verb == "off").then(|| {
                self.ctx.requests.push(Request::Remove(self.id.clone()));
                "bye".to_owned()
            })
        }
        fn handle_option(&mut self, key: &str, value: &str, action: SettingsAction) -> Outcome {
            if key != "level" {
                return Outcome::unknown_option();
            }
            match (action, value.parse::<u8>()) {
                (SettingsAction::Read, _) => Outcome::ok(self.level.get().to_string()),
                (_, Err(_)) => Outcome::invalid_value(),
                (SettingsAction::Verify, Ok(_)) => Outcome::ok(value),
                (SettingsAction::Save, Ok(v)) => {
                    self.level.set(v);
                    Outcome::ok(value)
                }
            }
        }
        fn get_string(&mut self, key: &str) -> Option<String> {
            (key == config::KEY_EXPORT).then(|| format!(r#"{{"level":{}}}"#, self.level.get()))
        }
    }

    fn service(level: Rc<Cell<u8>>) -> AppService<FakeTime, FakeTime> {
        let settings = Settings::new(Box::new(NvsAdapter::new().unwrap()), 7882);
        let ctx = Context::new(MessageBus::new(), settings, SystemState::new());
        let factory = BuiltinFactory::new(
            || Box::new(SimRadio::new()),
            || Box::new(SimTransport::new()),
            LogRing::new(config::LOG_MAX_LINES),
        )
        .with_optional("relay", move |id, ctx| {
            Box::new(Relay {
                id: id.clone(),
                ctx: ctx.clone(),
                level: level.clone(),
            })
        });
        let time = FakeTime::default();
        AppService::new(factory, ctx, time.clone(), time)
    }

    #[test]
    fn start_adds_builtins_and_enabled_optionals() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID, config::LOG_ID, config::WIFI_ID, config::MQTT_ID]);
        assert_eq!(app.registry().len(), 5);
        assert_eq!(app.context().state.components()[0], "relay");
    }

    #[test]
    fn optional_component_follows_core_option() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID]);
        assert!(app.registry().contains("relay"));

        let outcome = app.route_command("core relay false").unwrap();
        assert!(outcome.is_success());
        assert!(app.registry().contains("relay"));
        assert_eq!(app.drain_requests(), 1);
        assert!(!app.registry().contains("relay"));

        // a disabled optional component stays off across a restart
        let ctx = app.context().clone();
        drop(app);
        let mut restored = AppService::new(
            BuiltinFactory::new(
                || Box::new(SimRadio::new()),
                || Box::new(SimTransport::new()),
                LogRing::new(4),
            )
            .with_optional("relay", |id, ctx| {
                Box::new(Relay {
                    id: id.clone(),
                    ctx: ctx.clone(),
                    level: Rc::default(),
                })
            }),
            ctx,
            FakeTime::default(),
            FakeTime::default(),
        );
        restored.start(&[config::CORE_ID]);
        assert!(!restored.registry().contains("relay"));

        restored.route_command("core relay true");
        restored.drain_requests();
        assert!(restored.registry().contains("relay"));
    }

    #[test]
    fn self_removal_is_deferred() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID]);
        let outcome = app.route_command("relay off").unwrap();
        assert_eq!(outcome, Outcome::ok("bye"));
        assert!(app.registry().contains("relay"));
        app.run_once();
        assert!(!app.registry().contains("relay"));
    }

    #[test]
    fn settings_batch_goes_to_named_component() {
        let level = Rc::new(Cell::new(0));
        let mut app = service(level.clone());
        app.start(&[config::CORE_ID]);
        let entries = vec![
            ("module_id".to_owned(), "relay".to_owned()),
            ("level".to_owned(), "7".to_owned()),
        ];
        let outcome = app.dispatch_settings("relay", &entries).unwrap();
        assert_eq!(outcome.code, ResultCode::Ok);
        assert_eq!(level.get(), 7);
        assert_eq!(app.dispatch_settings("nope", &entries), None);
    }

    #[test]
    fn config_upload_round_trips_through_import() {
        let level = Rc::new(Cell::new(3));
        let mut app = service(level.clone());
        app.start(&[config::CORE_ID]);
        assert_eq!(app.export("relay").as_deref(), Some(r#"{"level":3}"#));

        let archive = app.export_all();
        assert!(archive.contains(r#""relay":{"level":3}"#));
        assert!(archive.contains(r#""core":{"#));
        level.set(0);

        let bytes = archive.as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        assert!(app.upload_begin("core", "config", bytes.len()).is_success());
        assert!(app.upload_block("core", head).is_success());
        assert!(app.upload_block("core", tail).is_success());
        assert!(app.upload_end("core", true).is_success());
        assert_eq!(level.get(), 0);

        app.drain_requests();
        assert_eq!(level.get(), 3);
    }

    #[test]
    fn uploads_to_missing_component_are_unknown() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID]);
        assert_eq!(app.upload_begin("wifi", "config", 4), Outcome::unknown_command());
        assert_eq!(app.upload_end("wifi", true), Outcome::unknown_command());
    }

    #[test]
    fn restart_command_completes_after_grace() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID]);
        app.route_command("restart");
        assert!(!app.restart_requested());
        let mut iterations = 0;
        while !app.restart_requested() && iterations < 1000 {
            app.run_once();
            iterations += 1;
        }
        assert!(app.restart_requested());
        assert!(iterations > 10);
    }

    #[test]
    fn drain_is_bounded() {
        let mut app = service(Rc::default());
        app.start(&[config::CORE_ID]);
        let requests = app.context().requests.clone();
        for _ in 0..MAX_REQUESTS_PER_DRAIN + 3 {
            requests.push(Request::Command("version".into()));
        }
        assert_eq!(app.drain_requests(), MAX_REQUESTS_PER_DRAIN);
        assert_eq!(app.drain_requests(), 3);
    }

    #[test]
    fn unknown_ids_do_not_start() {
        let mut app = service(Rc::default());
        app.start(&["ghost", config::CORE_ID]);
        assert!(!app.registry().contains("ghost"));
        assert!(app.registry().contains("core"));
    }
}
