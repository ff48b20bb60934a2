//! Station WiFi component.  Owns the [`WifiStateMachine`], drives it once
//! per second and forwards its connectivity events to the bus.

use log::{error, info};
use serde_json::json;

use crate::app::ports::WifiRadio;
use crate::component::{Capabilities, Component, ComponentId, Context, TickPhase};
use crate::config::{self, ConfigMethod, WifiConfig};
use crate::error::{Outcome, ResultCode, messages};
use crate::fsm::wifi::{WifiState, WifiStateMachine};
use crate::settings::{OptionHandler, SettingsAction, StringConstraints};

/// Stored configuration with the hostname macros expanded.
fn load_config(ctx: &Context) -> WifiConfig {
    let mut cfg = WifiConfig::load(&ctx.settings);
    cfg.hostname = ctx.settings.expand_macros(&cfg.hostname);
    cfg
}

pub struct WifiComponent {
    id: ComponentId,
    ctx: Context,
    fsm: WifiStateMachine<Box<dyn WifiRadio>>,
}

impl WifiComponent {
    pub fn new(ctx: &Context, radio: Box<dyn WifiRadio>) -> Self {
        let cfg = load_config(ctx);
        info!("WiFi: hostname {}", cfg.hostname);
        let mut fsm = WifiStateMachine::new(radio, cfg);
        fsm.begin();
        let mut wifi = Self {
            id: ComponentId::from_static(config::WIFI_ID),
            ctx: ctx.clone(),
            fsm,
        };
        wifi.flush();
        wifi
    }

    pub fn state(&self) -> WifiState {
        self.fsm.state()
    }

    /// Forward buffered state machine events to the bus.
    fn flush(&mut self) {
        for event in self.fsm.take_events() {
            self.ctx.bus.publish(&event);
        }
    }

    fn config_method(&self, value: &str, action: SettingsAction) -> Outcome {
        let settings = &self.ctx.settings;
        let current = ConfigMethod::from_byte(settings.get_byte(
            config::WIFI_ID,
            "cfgmethod",
            config::WIFI_CONFIG_METHOD.to_byte(),
        ))
        .unwrap_or(config::WIFI_CONFIG_METHOD);
        if action == SettingsAction::Read {
            return Outcome::ok(current.as_str());
        }
        let Some(method) = ConfigMethod::parse(value.trim()) else {
            return Outcome::invalid_value();
        };
        if action == SettingsAction::Save {
            if let Err(e) = settings.set_byte(config::WIFI_ID, "cfgmethod", method.to_byte()) {
                error!("WiFi: saving cfgmethod failed: {}", e);
                return Outcome::error(messages::STORAGE_FAILURE);
            }
            // The fallback is cached by the state machine
            if method != current {
                return Outcome::new(ResultCode::OkReinit, method.as_str());
            }
            return Outcome::ok(method.as_str());
        }
        Outcome::ok(current.as_str())
    }

    fn status(&self) -> String {
        let state = match self.fsm.state() {
            WifiState::Idle => "idle",
            WifiState::Connecting(_) => "connecting",
            WifiState::Connected => "connected",
            WifiState::ApManagerMode => "manager",
            WifiState::Reconfiguring(_) => "reconfiguring",
        };
        json!({
            "State": state,
            "Profile": self.fsm.profile().number(),
            "Attempts": self.fsm.attempts(),
            "Hostname": self.fsm.config().hostname,
        })
        .to_string()
    }
}

impl Component for WifiComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn name(&self) -> &str {
        "WiFi"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            needs_periodic_tick: true,
            exposes_config_page: true,
            exposes_status_page: true,
            ..Capabilities::default()
        }
    }

    fn tick(&mut self, phase: TickPhase) {
        if phase.is(config::WIFI_CHECK_PHASE) {
            self.fsm.on_second();
            self.flush();
            let link = self
                .fsm
                .is_reachable()
                .then(|| self.fsm.radio().link_info())
                .flatten();
            self.ctx.state.set_link(link);
        }
    }

    fn reinit(&mut self) {
        self.fsm.set_config(load_config(&self.ctx));
        self.fsm.request_reinit();
        self.flush();
    }

    fn handle_command(&mut self, verb: &str, _args: &str) -> Option<String> {
        match verb {
            "reconnect" => self.reinit(),
            "manager" => {
                self.fsm.start_manager();
                self.flush();
            }
            "status" => return Some(self.status()),
            _ => return None,
        }
        Some(messages::OK.to_owned())
    }

    fn handle_option(&mut self, key: &str, value: &str, action: SettingsAction) -> Outcome {
        let options = OptionHandler::new(&self.ctx.settings, config::WIFI_ID);
        match key {
            config::WIFI_HOSTNAME_OPTION => options.string(
                key,
                value,
                action,
                StringConstraints::REQUIRED_IMPORTANT,
                config::WIFI_HOSTNAME,
            ),
            "ssid1" | "pwd1" | "ssid2" | "pwd2" => {
                options.string(key, value, action, StringConstraints::IMPORTANT, "")
            }
            "cfgmethod" => self.config_method(value, action),
            "ipaddr" | "ipmask" | "ipgate" | "ipdns" => {
                let default = match key {
                    "ipaddr" => config::WIFI_IP_ADDRESS,
                    "ipmask" => config::WIFI_SUBNET_MASK,
                    "ipgate" => config::WIFI_GATEWAY,
                    _ => config::WIFI_DNS,
                };
                options.ip(key, value, action, StringConstraints::REQUIRED, default)
            }
            _ => Outcome::unknown_option(),
        }
    }

    fn get_string(&mut self, key: &str) -> Option<String> {
        if key != config::KEY_EXPORT {
            return None;
        }
        serde_json::to_string(&WifiConfig::load(&self.ctx.settings)).ok()
    }
}
