//! Simulated device rig for integration tests.
//!
//! Wires a full [`AppService`] to the simulation radio and broker and a
//! virtual clock that only advances while the scheduler sleeps, so a
//! simulated minute runs in milliseconds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use modhub::adapters::log_sink::LogRing;
use modhub::adapters::mqtt::SimTransport;
use modhub::adapters::nvs::NvsAdapter;
use modhub::adapters::wifi::SimRadio;
use modhub::app::ports::Clock;
use modhub::app::service::AppService;
use modhub::component::{Capabilities, Component, ComponentId, Context};
use modhub::components::BuiltinFactory;
use modhub::config;
use modhub::events::{Event, EventKind, MessageBus, Token};
use modhub::settings::Settings;
use modhub::state::SystemState;

pub const MAC4: u16 = 7882;

pub const ALL: [&str; 4] = [config::CORE_ID, config::LOG_ID, config::WIFI_ID, config::MQTT_ID];

// ── Virtual time ──────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct VirtualTime(Rc<Cell<u64>>);

impl VirtualTime {
    pub fn now_ms(&self) -> u64 {
        self.0.get() / 1000
    }
}

impl Clock for VirtualTime {
    fn now_us(&self) -> u64 {
        self.0.get()
    }
}

impl DelayNs for VirtualTime {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns) / 1000);
    }
}

// ── Optional sensor component ──────────────────────────────────

/// Optional component that counts its live instances and may leave a
/// subscription behind when dropped.
pub struct Sensor {
    id: ComponentId,
    live: Rc<Cell<i32>>,
    token: Token,
    bus: MessageBus,
    leak: bool,
}

impl Sensor {
    pub fn new(id: &ComponentId, ctx: &Context, live: Rc<Cell<i32>>, leak: bool) -> Self {
        live.set(live.get() + 1);
        let token = ctx.bus.new_token();
        ctx.bus.subscribe_with(token, EventKind::LogUpdate, |_| {});
        Self {
            id: id.clone(),
            live,
            token,
            bus: ctx.bus.clone(),
            leak,
        }
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
        if !self.leak {
            self.bus.unsubscribe_all(self.token);
        }
    }
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
        Some(self.token)
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub app: AppService<VirtualTime, VirtualTime>,
    pub radio: SimRadio,
    pub broker: SimTransport,
    pub time: VirtualTime,
    pub sensors: Rc<Cell<i32>>,
}

#[allow(dead_code)]
impl Rig {
    /// Fresh device with empty flash.
    pub fn new() -> Self {
        Self::with_settings(Settings::new(Box::new(NvsAdapter::new().unwrap()), MAC4))
    }

    /// Device booting on existing flash contents.
    pub fn with_settings(settings: Settings) -> Self {
        Self::build(settings, SimRadio::new(), false)
    }

    pub fn build(settings: Settings, radio: SimRadio, leaky_sensor: bool) -> Self {
        let broker = SimTransport::new();
        let sensors = Rc::new(Cell::new(0));
        let factory = {
            let radio = radio.clone();
            let broker = broker.clone();
            let sensors = sensors.clone();
            BuiltinFactory::new(
                move || Box::new(radio.clone()),
                move || Box::new(broker.clone()),
                LogRing::new(config::LOG_MAX_LINES),
            )
            .with_optional("sensor", move |id, ctx| {
                Box::new(Sensor::new(id, ctx, sensors.clone(), leaky_sensor))
            })
        };
        let ctx = Context::new(MessageBus::new(), settings, SystemState::new());
        let time = VirtualTime::default();
        let app = AppService::new(factory, ctx, time.clone(), time.clone());
        Self {
            app,
            radio,
            broker,
            time,
            sensors,
        }
    }

    pub fn ctx(&self) -> Context {
        self.app.context().clone()
    }

    pub fn store_wifi(&self, ssid: &str, pwd: &str) {
        let settings = &self.app.context().settings;
        settings.set_string(config::WIFI_ID, "ssid1", ssid).unwrap();
        settings.set_string(config::WIFI_ID, "pwd1", pwd).unwrap();
    }

    pub fn start(&mut self) {
        self.app.start(&ALL);
    }

    /// Run the main loop for `secs` of virtual time.
    pub fn run_secs(&mut self, secs: u64) {
        let until = self.time.now_ms() + secs * 1000;
        while self.time.now_ms() < until {
            self.app.run_once();
        }
    }

    /// Run until `done` holds, at most `max_secs` of virtual time.  Returns
    /// whether `done` held.
    pub fn run_until(&mut self, max_secs: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        let until = self.time.now_ms() + max_secs * 1000;
        while self.time.now_ms() < until {
            if done(self) {
                return true;
            }
            self.app.run_once();
        }
        done(self)
    }

    /// Bring WiFi and MQTT up with a known network.
    pub fn online(&mut self) {
        self.radio.add_network("home", "secret99");
        self.store_wifi("home", "secret99");
        self.start();
        let ctx = self.ctx();
        assert!(self.run_until(30, |_| ctx.state.mqtt_connected()));
    }
}

/// Record every event of `kind`.
pub fn record(bus: &MessageBus, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let _ = bus.subscribe(kind, move |e| sink.borrow_mut().push(e.clone()));
    seen
}
