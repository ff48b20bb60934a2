//! MQTT component.  Owns the [`MqttStateMachine`], bridges bus traffic to
//! broker topics and turns inbound messages into deferred commands.
//!
//! | Bus event                                  | Broker topic                 |
//! |--------------------------------------------|------------------------------|
//! | `CommandResponse { topic, payload }`       | `<stat>/<device>/<topic>`    |
//! | `StatusChanged { source, payload }`        | `<tele>/<device>/<source>`   |
//!
//! The state machine is shared with the bus callbacks.  Callbacks only
//! `try_borrow_mut` it; the component never holds the borrow while it
//! publishes.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};
use serde_json::json;

use crate::app::ports::MqttTransport;
use crate::component::{Capabilities, Component, ComponentId, Context, Request, TickPhase};
use crate::config::{self, MqttConfig};
use crate::error::{Outcome, messages};
use crate::events::{ConnectivityKind, Event, EventKind, Subscriptions, Token};
use crate::fsm::mqtt::{MqttState, MqttStateMachine, TopicPrefix};
use crate::settings::{OptionHandler, SettingsAction, StringConstraints};

type SharedMachine = Rc<RefCell<MqttStateMachine<Box<dyn MqttTransport>>>>;

fn load_config(ctx: &Context) -> MqttConfig {
    MqttConfig::load(&ctx.settings).expanded(&ctx.settings)
}

/// Run `f` on the machine unless it is already borrowed.
fn with_machine(
    fsm: &SharedMachine,
    what: &str,
    f: impl FnOnce(&mut MqttStateMachine<Box<dyn MqttTransport>>),
) {
    match fsm.try_borrow_mut() {
        Ok(mut m) => f(&mut m),
        Err(_) => debug!("MQTT: busy, {} dropped", what),
    }
}

pub struct MqttComponent {
    id: ComponentId,
    ctx: Context,
    fsm: SharedMachine,
    subs: Subscriptions,
}

impl MqttComponent {
    pub fn new(ctx: &Context, transport: Box<dyn MqttTransport>) -> Self {
        let fsm: SharedMachine = Rc::new(RefCell::new(MqttStateMachine::new(
            transport,
            load_config(ctx),
        )));
        let subs = Subscriptions::new(&ctx.bus);

        let m = fsm.clone();
        subs.listen(EventKind::Connectivity, move |event| {
            if let Event::Connectivity {
                kind: ConnectivityKind::Wifi,
                connected,
            } = event
            {
                with_machine(&m, "wifi change", |fsm| fsm.on_wifi(*connected));
            }
        });

        let m = fsm.clone();
        subs.listen(EventKind::CommandResponse, move |event| {
            if let Event::CommandResponse { topic, payload, .. } = event {
                with_machine(&m, "response", |fsm| {
                    fsm.publish(TopicPrefix::Status, topic, payload);
                });
            }
        });

        let m = fsm.clone();
        subs.listen(EventKind::StatusChanged, move |event| {
            if let Event::StatusChanged { source, payload } = event {
                with_machine(&m, "status", |fsm| {
                    fsm.publish(TopicPrefix::Telemetry, source.as_str(), payload);
                });
            }
        });

        if ctx.state.wifi_connected() {
            with_machine(&fsm, "wifi change", |fsm| fsm.on_wifi(true));
        }

        Self {
            id: ComponentId::from_static(config::MQTT_ID),
            ctx: ctx.clone(),
            fsm,
            subs,
        }
    }

    pub fn state(&self) -> MqttState {
        self.fsm.borrow().state()
    }

    /// Publish buffered events and queue inbound commands, outside the
    /// machine borrow.
    fn drain(&self) {
        let (events, commands) = {
            let Ok(mut fsm) = self.fsm.try_borrow_mut() else {
                return;
            };
            (fsm.take_events(), fsm.take_commands())
        };
        for event in events {
            self.ctx.bus.publish(&event);
        }
        for command in commands {
            info!("MQTT: command '{}'", command);
            self.ctx.requests.push(Request::Command(command));
        }
    }

    fn status(&self) -> String {
        let fsm = self.fsm.borrow();
        let state = match fsm.state() {
            MqttState::Disconnected => "disconnected",
            MqttState::Connecting => "connecting",
            MqttState::Connected => "connected",
        };
        json!({
            "State": state,
            "Host": fsm.config().host.to_string(),
            "Port": fsm.config().port,
            "ClientId": fsm.config().clientid,
            "RetryIn": fsm.retry_remaining(),
        })
        .to_string()
    }
}

impl Component for MqttComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn name(&self) -> &str {
        "MQTT"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            needs_poll_pump: true,
            needs_periodic_tick: true,
            exposes_config_page: true,
            exposes_status_page: true,
        }
    }

    fn subscription_token(&self) -> Option<Token> {
        Some(self.subs.token())
    }

    fn pump(&mut self) {
        with_machine(&self.fsm, "poll", MqttStateMachine::poll);
        self.drain();
    }

    fn tick(&mut self, phase: TickPhase) {
        if phase.is(config::MQTT_TICK_PHASE) {
            with_machine(&self.fsm, "tick", MqttStateMachine::on_second);
            self.drain();
        }
    }

    fn reinit(&mut self) {
        let cfg = load_config(&self.ctx);
        with_machine(&self.fsm, "reinit", |fsm| {
            fsm.set_config(cfg);
            fsm.reconnect();
        });
        self.drain();
    }

    fn handle_command(&mut self, verb: &str, _args: &str) -> Option<String> {
        match verb {
            "reconnect" => {
                self.reinit();
                Some(messages::OK.to_owned())
            }
            "status" => Some(self.status()),
            _ => None,
        }
    }

    fn handle_option(&mut self, key: &str, value: &str, action: SettingsAction) -> Outcome {
        let options = OptionHandler::new(&self.ctx.settings, config::MQTT_ID);
        match key {
            config::MQTT_CLIENT_ID_OPTION => options.string(
                key,
                value,
                action,
                StringConstraints::REQUIRED_IMPORTANT,
                config::MQTT_CLIENT_ID,
            ),
            "host" => options.ip(
                key,
                value,
                action,
                StringConstraints::REQUIRED_IMPORTANT,
                config::MQTT_HOST,
            ),
            "port" => {
                if action != SettingsAction::Read && value.trim().parse::<u16>() == Ok(0) {
                    return Outcome::invalid_value();
                }
                options.short(key, value, action, true, config::MQTT_PORT)
            }
            "user" | "pwd" => {
                let default = if key == "user" {
                    config::MQTT_USERNAME
                } else {
                    config::MQTT_PASSWORD
                };
                options.string(key, value, action, StringConstraints::OPTIONAL, default)
            }
            "reconnect" => options.short(key, value, action, false, config::MQTT_RECONNECT_SECS),
            config::MQTT_TELEMETRY_OPTION => {
                options.short(key, value, action, false, config::MQTT_TELEMETRY_SECS)
            }
            config::MQTT_TOPIC_OPTION
            | config::MQTT_GROUP_TOPIC_OPTION
            | "cmnd"
            | "stat"
            | "tele"
            | "fulltopic" => {
                let default = match key {
                    config::MQTT_TOPIC_OPTION => config::MQTT_DEVICE_TOPIC,
                    config::MQTT_GROUP_TOPIC_OPTION => config::MQTT_GROUP_TOPIC,
                    "cmnd" => config::MQTT_SUB_PREFIX,
                    "stat" => config::MQTT_PUB_PREFIX,
                    "tele" => config::MQTT_TELE_PREFIX,
                    _ => config::MQTT_FULL_TOPIC,
                };
                options.string(key, value, action, StringConstraints::REQUIRED_IMPORTANT, default)
            }
            _ => Outcome::unknown_option(),
        }
    }

    fn get_string(&mut self, key: &str) -> Option<String> {
        if key != config::KEY_EXPORT {
            return None;
        }
        serde_json::to_string(&MqttConfig::load(&self.ctx.settings)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mqtt::SimTransport;
    use crate::adapters::nvs::NvsAdapter;
    use crate::component::ComponentId;
    use crate::error::ResultCode;
    use crate::events::MessageBus;
    use crate::settings::Settings;
    use crate::state::SystemState;

    fn ctx() -> Context {
        let settings = Settings::new(Box::new(NvsAdapter::new().unwrap()), 7882);
        Context::new(MessageBus::new(), settings, SystemState::new())
    }

    fn wifi_up(ctx: &Context) {
        ctx.bus.publish(&Event::Connectivity {
            kind: ConnectivityKind::Wifi,
            connected: true,
        });
    }

    fn connected(ctx: &Context) -> (MqttComponent, SimTransport) {
        let transport = SimTransport::new();
        let mut mqtt = MqttComponent::new(ctx, Box::new(transport.clone()));
        wifi_up(ctx);
        mqtt.pump();
        (mqtt, transport)
    }

    #[test]
    fn wifi_up_opens_session() {
        let ctx = ctx();
        let (mqtt, transport) = connected(&ctx);
        assert_eq!(mqtt.state(), MqttState::Connected);
        assert_eq!(transport.sessions()[0].client_id, "modhub_7882");
        assert_eq!(transport.payloads("tele/device/LWT"), ["Online"]);
    }

    #[test]
    fn bus_traffic_reaches_broker() {
        let ctx = ctx();
        let (_mqtt, transport) = connected(&ctx);
        ctx.bus.publish(&Event::CommandResponse {
            source: ComponentId::from_static("core"),
            topic: "core".into(),
            payload: r#"{"sleeptime":"20"}"#.into(),
        });
        ctx.bus.publish(&Event::StatusChanged {
            source: ComponentId::from_static("core"),
            payload: "{}".into(),
        });
        assert_eq!(transport.payloads("stat/device/core"), [r#"{"sleeptime":"20"}"#]);
        assert_eq!(transport.payloads("tele/device/core"), ["{}"]);
    }

    #[test]
    fn inbound_message_becomes_deferred_command() {
        let ctx = ctx();
        let (mut mqtt, transport) = connected(&ctx);
        transport.inject("cmnd/device/sleeptime", "20");
        mqtt.pump();
        assert_eq!(ctx.requests.pop(), Some(Request::Command("sleeptime 20".into())));
    }

    #[test]
    fn connectivity_is_published() {
        let ctx = ctx();
        let _state_subs = ctx.state.attach(&ctx.bus);
        let (mut mqtt, transport) = connected(&ctx);
        assert!(ctx.state.mqtt_connected());
        transport.drop_connection();
        mqtt.pump();
        assert!(!ctx.state.mqtt_connected());
        assert_eq!(mqtt.state(), MqttState::Disconnected);
    }

    #[test]
    fn starts_immediately_when_wifi_already_up() {
        let ctx = ctx();
        let _state_subs = ctx.state.attach(&ctx.bus);
        wifi_up(&ctx);
        let transport = SimTransport::new();
        let mut mqtt = MqttComponent::new(&ctx, Box::new(transport.clone()));
        mqtt.pump();
        assert_eq!(mqtt.state(), MqttState::Connected);
    }

    #[test]
    fn option_rules() {
        let ctx = ctx();
        let mut mqtt = MqttComponent::new(&ctx, Box::new(SimTransport::new()));
        let mut opt = |key, value, action| mqtt.handle_option(key, value, action);
        assert_eq!(opt("port", "0", SettingsAction::Verify), Outcome::invalid_value());
        assert_eq!(opt("port", "8883", SettingsAction::Save).code, ResultCode::OkReinit);
        assert_eq!(opt("host", "", SettingsAction::Verify), Outcome::invalid_value());
        assert_eq!(opt("telemetry", "60", SettingsAction::Save), Outcome::ok("60"));
        assert_eq!(opt("user", "", SettingsAction::Save), Outcome::ok(""));
        assert_eq!(opt("topic", "", SettingsAction::Verify), Outcome::invalid_value());
        assert_eq!(opt("qos", "1", SettingsAction::Verify), Outcome::unknown_option());
    }

    #[test]
    fn reinit_picks_up_new_broker() {
        let ctx = ctx();
        let (mut mqtt, transport) = connected(&ctx);
        ctx.settings.set_short(config::MQTT_ID, "port", 1884).unwrap();
        mqtt.reinit();
        mqtt.pump();
        mqtt.pump();
        assert_eq!(mqtt.state(), MqttState::Disconnected);
        // next retry uses the new port
        for _ in 0..=config::MQTT_RECONNECT_SECS {
            mqtt.tick(TickPhase::new(config::MQTT_TICK_PHASE).unwrap());
        }
        mqtt.pump();
        assert_eq!(mqtt.state(), MqttState::Connected);
        assert_eq!(transport.sessions().len(), 2);
    }

    #[test]
    fn dropping_revokes_subscriptions() {
        let ctx = ctx();
        let mqtt = MqttComponent::new(&ctx, Box::new(SimTransport::new()));
        let token = mqtt.subscription_token().unwrap();
        drop(mqtt);
        assert!(!ctx.bus.has_subscriptions(token));
    }
}
