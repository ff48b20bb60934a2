//! System component: restart sequencing, device info, telemetry, global
//! options and the upload boundary.

use std::cell::Cell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use log::{LevelFilter, debug, error, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::app::ports::LinkInfo;
use crate::component::{Capabilities, Component, ComponentId, Context, Request, TickPhase};
use crate::config;
use crate::diagnostics::{self, HeapStats, RuntimeMetrics};
use crate::error::{Outcome, messages};
use crate::events::{ConnectivityKind, Event, EventKind, Subscriptions, SystemEventKind, Token};
use crate::settings::{OptionHandler, Settings, SettingsAction, SleepMode};
use crate::upload::{self, UploadError, UploadHandler};

const LOG_LEVEL_OPTION: &str = "loglevel";
const EXTRA_OPTIONS_OPTION: &str = "options";
const LOG_LEVELS: [&str; 7] = ["silent", "fatal", "error", "warning", "notice", "trace", "verbose"];

fn level_name(level: u8) -> &'static str {
    LOG_LEVELS.get(usize::from(level)).copied().unwrap_or(LOG_LEVELS[0])
}

fn parse_level(name: &str) -> Option<u8> {
    LOG_LEVELS.iter().position(|l| *l == name).map(|p| p as u8)
}

/// Console level → `log` filter.  `fatal` and `error` share one filter.
pub fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1 | 2 => LevelFilter::Error,
        3 => LevelFilter::Warn,
        4 => LevelFilter::Info,
        5 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Board-level options kept as one JSON object under `options`.
#[derive(Debug, Default, Deserialize)]
struct ExtraOptions {
    wire: Option<WireOptions>,
}

/// I2C pins.
#[derive(Debug, Deserialize)]
struct WireOptions {
    sda: u8,
    scl: u8,
}

const GPIO_RANGE: std::ops::RangeInclusive<u8> = 1..=39;

/// Empty text means no extra options.
fn parse_extra_options(text: &str) -> Option<ExtraOptions> {
    if text.trim().is_empty() {
        return Some(ExtraOptions::default());
    }
    let value: Value = serde_json::from_str(text).ok()?;
    if !value.is_object() {
        return None;
    }
    let options: ExtraOptions = serde_json::from_value(value).ok()?;
    if let Some(wire) = &options.wire {
        if !GPIO_RANGE.contains(&wire.sda) || !GPIO_RANGE.contains(&wire.scl) {
            return None;
        }
    }
    Some(options)
}

fn apply_extra_options(options: &ExtraOptions) {
    if let Some(wire) = &options.wire {
        info!("Core: i2c wire on scl={} sda={}", wire.scl, wire.sda);
    }
}

/// Signal quality in percent, linear between -100 and -50 dBm.
fn rssi_quality(rssi: i8) -> u8 {
    (2 * (i16::from(rssi) + 100)).clamp(0, 100) as u8
}

fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// `<days>T<hh>:<mm>:<ss>`
fn format_uptime(secs: u64) -> String {
    format!(
        "{}T{:02}:{:02}:{:02}",
        secs / 86_400,
        secs % 86_400 / 3600,
        secs % 3600 / 60,
        secs % 60
    )
}

pub struct CoreComponent {
    id: ComponentId,
    ctx: Context,
    subs: Subscriptions,
    optional: Vec<ComponentId>,
    /// Grace ticks left before the restart is flagged; `None` when idle.
    restart: Rc<Cell<Option<u8>>>,
    telemetry_secs: u16,
    upload: Option<Box<dyn UploadHandler>>,
}

impl CoreComponent {
    pub fn new(ctx: &Context, optional: Vec<ComponentId>) -> Self {
        let ctx = ctx.clone();
        let restart = Rc::new(Cell::new(None));
        let subs = Subscriptions::new(&ctx.bus);

        let pending = restart.clone();
        subs.listen(EventKind::System, move |event| {
            if let Event::System(SystemEventKind::PendingRestart) = event {
                if pending.get().is_none() {
                    info!("Core: restart in {}s", config::RESTART_GRACE_SECS);
                }
                pending.set(Some(config::RESTART_GRACE_SECS));
            }
        });

        let info_ctx = ctx.clone();
        subs.listen(EventKind::Connectivity, move |event| {
            if let Event::Connectivity {
                kind: ConnectivityKind::Mqtt,
                connected: true,
            } = event
            {
                publish_device_info(&info_ctx);
            }
        });

        let level = ctx
            .settings
            .get_byte(config::CORE_ID, LOG_LEVEL_OPTION, config::DEFAULT_LOG_LEVEL);
        log::set_max_level(level_filter(level));
        info!("Core: {} firmware {}", config::PROJECT_NAME, config::VERSION);

        let extra = ctx.settings.get_string(config::CORE_ID, EXTRA_OPTIONS_OPTION, "");
        match parse_extra_options(&extra) {
            Some(options) => apply_extra_options(&options),
            None => error!("Core: stored extra options are invalid"),
        }

        for id in &optional {
            if ctx.settings.get_byte(config::CORE_ID, id.as_str(), 1) != 0 {
                ctx.requests.push(Request::Add(id.clone()));
            }
        }

        Self {
            id: ComponentId::from_static(config::CORE_ID),
            ctx,
            subs,
            optional,
            restart,
            telemetry_secs: 0,
            upload: None,
        }
    }

    fn schedule_restart(&self) {
        self.ctx
            .bus
            .publish(&Event::System(SystemEventKind::PendingRestart));
    }

    fn restart_tick(&self) {
        match self.restart.get() {
            Some(0) => {
                self.restart.set(None);
                info!("Core: restarting");
                self.ctx.state.request_restart();
            }
            Some(n) => self.restart.set(Some(n - 1)),
            None => {}
        }
    }

    fn telemetry_tick(&mut self) {
        let period = self.ctx.settings.get_short(
            config::MQTT_ID,
            config::MQTT_TELEMETRY_OPTION,
            config::MQTT_TELEMETRY_SECS,
        );
        if period == 0 {
            return;
        }
        self.telemetry_secs += 1;
        if self.telemetry_secs >= period {
            self.telemetry_secs = 0;
            self.ctx.bus.publish(&Event::StatusChanged {
                source: self.id.clone(),
                payload: json!({ "Telemetry": self.metrics() }).to_string(),
            });
        }
    }

    fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::collect(self.ctx.state.uptime_ms() / 1000, self.ctx.state.cpu_load())
    }

    fn optional_option(&mut self, key: &str, value: &str, action: SettingsAction) -> Outcome {
        let options = OptionHandler::new(&self.ctx.settings, config::CORE_ID);
        let before = self.ctx.settings.get_byte(config::CORE_ID, key, 1) != 0;
        let outcome = options.flag(key, value, action, false, true);
        if action == SettingsAction::Save && outcome.is_success() {
            let after = outcome.detail == "true";
            if after != before {
                if let Some(id) = ComponentId::new(key) {
                    debug!("Core: '{}' {}", id, if after { "enabled" } else { "disabled" });
                    self.ctx.requests.push(if after {
                        Request::Add(id)
                    } else {
                        Request::Remove(id)
                    });
                }
            }
        }
        outcome
    }

    fn extra_options(&self, value: &str, action: SettingsAction) -> Outcome {
        let settings = &self.ctx.settings;
        if action == SettingsAction::Read {
            return Outcome::ok(settings.get_string(config::CORE_ID, EXTRA_OPTIONS_OPTION, ""));
        }
        let Some(options) = parse_extra_options(value) else {
            return Outcome::invalid_value();
        };
        if !Settings::fits_string(value) {
            return Outcome::invalid_value();
        }
        if action == SettingsAction::Save {
            if let Err(e) = settings.set_string(config::CORE_ID, EXTRA_OPTIONS_OPTION, value) {
                error!("Core: saving extra options failed: {}", e);
                return Outcome::error(messages::STORAGE_FAILURE);
            }
            apply_extra_options(&options);
        }
        Outcome::ok(value)
    }

    fn net_info(&self) -> String {
        let link = self.ctx.state.link();
        let addr = |f: fn(&LinkInfo) -> Ipv4Addr| {
            link.as_ref().map_or(Ipv4Addr::UNSPECIFIED, f).to_string()
        };
        json!({
            "LocalIP": addr(|l| l.address),
            "SubnetMask": addr(|l| l.netmask),
            "GatewayIP": addr(|l| l.gateway),
            "DnsIP": addr(|l| l.dns),
            "Mac": link.as_ref().map(|l| format_mac(l.mac)).unwrap_or_default(),
        })
        .to_string()
    }

    fn wifi_info(&self) -> String {
        match self.ctx.state.link() {
            Some(link) => json!({
                "SSID": link.ssid,
                "BSSID": format_mac(link.bssid),
                "Channel": link.channel,
                "RSSI": rssi_quality(link.rssi),
            }),
            None => json!({ "SSID": "", "BSSID": "", "Channel": 0, "RSSI": 0 }),
        }
        .to_string()
    }

    fn export(&self) -> String {
        let settings = &self.ctx.settings;
        let mut obj = Map::new();
        obj.insert("sleepmode".into(), settings.sleep_mode().as_str().into());
        obj.insert("sleeptime".into(), settings.sleep_time_ms().into());
        let level = settings.get_byte(config::CORE_ID, LOG_LEVEL_OPTION, config::DEFAULT_LOG_LEVEL);
        obj.insert(LOG_LEVEL_OPTION.into(), level_name(level).into());
        let extra = settings.get_string(config::CORE_ID, EXTRA_OPTIONS_OPTION, "");
        if !extra.is_empty() {
            obj.insert(EXTRA_OPTIONS_OPTION.into(), extra.into());
        }
        for id in &self.optional {
            let enabled = settings.get_byte(config::CORE_ID, id.as_str(), 1) != 0;
            obj.insert(id.to_string(), enabled.into());
        }
        Value::Object(obj).to_string()
    }
}

fn publish_device_info(ctx: &Context) {
    let source = ComponentId::from_static(config::CORE_ID);
    let settings = &ctx.settings;
    let info1 = json!({
        "Info1": { "Codename": config::PROJECT_NAME, "Version": config::VERSION }
    });
    let info2 = json!({
        "Info2": {
            "Hostname": settings.get_macro_string(
                config::WIFI_ID, config::WIFI_HOSTNAME_OPTION, config::WIFI_HOSTNAME),
            "FallbackTopic": settings.get_macro_string(
                config::MQTT_ID, config::MQTT_CLIENT_ID_OPTION, config::MQTT_CLIENT_ID),
            "GroupTopic": settings.get_macro_string(
                config::MQTT_ID, config::MQTT_GROUP_TOPIC_OPTION, config::MQTT_GROUP_TOPIC),
        }
    });
    for payload in [info1, info2] {
        ctx.bus.publish(&Event::StatusChanged {
            source: source.clone(),
            payload: payload.to_string(),
        });
    }
}

impl Component for CoreComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn name(&self) -> &str {
        "Core"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            needs_periodic_tick: true,
            exposes_config_page: true,
            ..Capabilities::default()
        }
    }

    fn subscription_token(&self) -> Option<Token> {
        Some(self.subs.token())
    }

    fn tick(&mut self, phase: TickPhase) {
        if phase.is(config::CORE_TELEMETRY_PHASE) {
            self.telemetry_tick();
        } else if phase.is(config::CORE_RESTART_PHASE) {
            self.restart_tick();
        }
    }

    fn handle_command(&mut self, verb: &str, args: &str) -> Option<String> {
        let state = &self.ctx.state;
        let result = match verb {
            "version" => json!({ "Codename": config::PROJECT_NAME, "Version": config::VERSION })
                .to_string(),
            "modules" => {
                let ids: Vec<String> =
                    state.components().iter().map(ToString::to_string).collect();
                json!({ "modules": ids }).to_string()
            }
            "heapstat" => json!(HeapStats::collect(state.uptime_ms() / 1000)).to_string(),
            "nvsstat" => {
                let stats = self.ctx.settings.storage_stats();
                json!({
                    "Used": stats.map_or(0, |s| s.used),
                    "Free": stats.map_or(0, |s| s.free),
                })
                .to_string()
            }
            "netinfo" => self.net_info(),
            "wifiinfo" => self.wifi_info(),
            "resetinfo" => json!({ "RestartReason": diagnostics::reset_reason() }).to_string(),
            "powerinfo" => json!({
                "SleepMode": self.ctx.settings.sleep_mode().as_str(),
                "SleepTime": self.ctx.settings.sleep_time_ms(),
                "LoadAvg": state.cpu_load(),
            })
            .to_string(),
            "telemetry" => json!(self.metrics()).to_string(),
            "timeinfo" => json!({ "Uptime": format_uptime(state.uptime_ms() / 1000) }).to_string(),
            "restart" => {
                self.schedule_restart();
                messages::OK.to_owned()
            }
            "nvs" if args == "clear" => {
                if let Err(e) = self.ctx.settings.clear() {
                    error!("Core: clearing settings failed: {}", e);
                    return Some(messages::STORAGE_FAILURE.to_owned());
                }
                warn!("Core: all settings erased");
                self.schedule_restart();
                messages::OK.to_owned()
            }
            "nvs" => messages::INVALID_VALUE.to_owned(),
            _ => return None,
        };
        Some(result)
    }

    fn handle_option(&mut self, key: &str, value: &str, action: SettingsAction) -> Outcome {
        let settings = &self.ctx.settings;
        match key {
            LOG_LEVEL_OPTION => {
                if action != SettingsAction::Read {
                    let Some(level) = parse_level(value) else {
                        return Outcome::invalid_value();
                    };
                    if action == SettingsAction::Save {
                        if let Err(e) = settings.set_byte(config::CORE_ID, key, level) {
                            error!("Core: saving loglevel failed: {}", e);
                            return Outcome::error(messages::STORAGE_FAILURE);
                        }
                        log::set_max_level(level_filter(level));
                    }
                }
                let level = settings.get_byte(config::CORE_ID, key, config::DEFAULT_LOG_LEVEL);
                Outcome::ok(level_name(level))
            }
            EXTRA_OPTIONS_OPTION => self.extra_options(value, action),
            "sleepmode" => {
                if action != SettingsAction::Read {
                    let Some(mode) = SleepMode::parse(value) else {
                        return Outcome::invalid_value();
                    };
                    if action == SettingsAction::Save {
                        if let Err(e) = settings.set_sleep_mode(mode) {
                            error!("Core: saving sleepmode failed: {}", e);
                            return Outcome::error(messages::STORAGE_FAILURE);
                        }
                    }
                }
                Outcome::ok(settings.sleep_mode().as_str())
            }
            "sleeptime" => {
                if action != SettingsAction::Read {
                    let Ok(ms) = value.trim().parse::<u8>() else {
                        return Outcome::invalid_value();
                    };
                    if ms > config::MAX_SLEEP_TIME_MS {
                        return Outcome::invalid_value();
                    }
                    if action == SettingsAction::Save {
                        if let Err(e) = settings.set_sleep_time_ms(ms) {
                            error!("Core: saving sleeptime failed: {}", e);
                            return Outcome::error(messages::STORAGE_FAILURE);
                        }
                    }
                }
                Outcome::ok(settings.sleep_time_ms().to_string())
            }
            _ if self.optional.iter().any(|id| id == key) => {
                self.optional_option(key, value, action)
            }
            _ => Outcome::unknown_option(),
        }
    }

    fn get_string(&mut self, key: &str) -> Option<String> {
        (key == config::KEY_EXPORT).then(|| self.export())
    }

    fn upload_begin(&mut self, action: &str, size: usize) -> Outcome {
        if self.upload.is_some() {
            return Outcome::error(messages::UPLOAD_IN_PROGRESS);
        }
        if size == 0 {
            return Outcome::error(messages::UPLOAD_INVALID_SIZE);
        }
        match upload::begin(action, size, &self.ctx.requests) {
            Ok(handler) => {
                self.upload = Some(handler);
                Outcome::ok(messages::UPLOAD_STARTED)
            }
            Err(UploadError::UnknownAction) => Outcome::unknown_command(),
            Err(e) => Outcome::error(e.to_string()),
        }
    }

    fn upload_block(&mut self, data: &[u8]) -> Outcome {
        let Some(handler) = self.upload.as_mut() else {
            return Outcome::unknown_command();
        };
        match handler.block(data) {
            Ok(()) => Outcome::ok(messages::OK),
            Err(e) => Outcome::error(e.to_string()),
        }
    }

    fn upload_end(&mut self, success: bool) -> Outcome {
        let Some(mut handler) = self.upload.take() else {
            return Outcome::unknown_command();
        };
        let outcome = match handler.end(success) {
            Ok(detail) => Outcome::ok(detail),
            Err(e) => {
                warn!("Core: upload failed: {}", e);
                Outcome::error(e.to_string())
            }
        };
        self.schedule_restart();
        outcome
    }
}
