//! Runtime configuration parameters.
//!
//! Compile-time defaults for every built-in option, protocol constants and
//! the serialisable option sets of the network components.  Stored values
//! override the defaults through the [`Settings`] handle.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::settings::{Settings, SleepMode};

// --- Application ---
pub const PROJECT_NAME: &str = "modhub";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// --- Built-in component ids ---
pub const CORE_ID: &str = "core";
pub const LOG_ID: &str = "log";
pub const WIFI_ID: &str = "wifi";
pub const MQTT_ID: &str = "mqtt";

// --- Settings ---
pub const SETTINGS_NAMESPACE: &str = "modhub_nvs";
/// `get_string` key returning a component's options as a JSON object.
pub const KEY_EXPORT: &str = "Export";
/// `set_string` key applying a JSON object of options.
pub const KEY_IMPORT: &str = "Import";

// --- Scheduler ---
pub const TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SLEEP_MODE: SleepMode = SleepMode::Dynamic;
/// Sleep quantum per loop iteration, milliseconds (0 = off).
pub const DEFAULT_SLEEP_TIME_MS: u8 = 15;
pub const MAX_SLEEP_TIME_MS: u8 = 250;

// --- Core ---
/// Seconds between a restart request and the actual reset.
pub const RESTART_GRACE_SECS: u8 = 2;
pub const CORE_RESTART_PHASE: u8 = 6;
pub const CORE_TELEMETRY_PHASE: u8 = 0;

// --- Log ---
pub const LOG_MAX_LINES: usize = 14;
pub const LOG_UPDATE_PHASE: u8 = 3;
/// Default console level name (see `components::core::LOG_LEVELS`).
pub const DEFAULT_LOG_LEVEL: u8 = 6;

// --- WiFi ---
pub const WIFI_CHECK_PHASE: u8 = 6;
/// Connect attempts before the fallback policy runs.
pub const WIFI_CONNECT_RETRIES: u8 = 20;
/// Seconds between checks while connected.
pub const WIFI_CHECK_SECS: u16 = 20;
/// Seconds allowed for one connect attempt.
pub const WIFI_CONNECT_DELAY_SECS: u16 = 4;
/// Seconds before the next check after a `Disconnected` link status.
pub const WIFI_DISCONNECTED_RECHECK_SECS: u16 = 2;
/// Manager mode ends after this many seconds without a connected station.
pub const WIFI_INACTIVITY_SECS: u16 = 300;
/// Delay before an option change reconfigures the link.
pub const WIFI_RECONFIG_DELAY_SECS: u8 = 2;
pub const WIFI_AP_SSID: &str = "modhub-ap";
pub const WIFI_AP_PASSWORD: &str = "12345678";
pub const WIFI_HOSTNAME: &str = "#TOPIC-#MAC4";
pub const WIFI_IP_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
pub const WIFI_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const WIFI_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
pub const WIFI_DNS: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
pub const WIFI_CONFIG_METHOD: ConfigMethod = ConfigMethod::Manager;
pub const WIFI_HOSTNAME_OPTION: &str = "hostname";

// --- MQTT ---
pub const MQTT_TICK_PHASE: u8 = 9;
pub const MQTT_CLIENT_ID: &str = "modhub_#MAC4";
pub const MQTT_HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 4);
pub const MQTT_PORT: u16 = 1883;
pub const MQTT_USERNAME: &str = "";
pub const MQTT_PASSWORD: &str = "";
/// Seconds between reconnect attempts.
pub const MQTT_RECONNECT_SECS: u16 = 10;
/// Seconds between telemetry reports (0 = disabled).
pub const MQTT_TELEMETRY_SECS: u16 = 300;
pub const MQTT_KEEPALIVE_SECS: u16 = 10;
pub const MQTT_DEVICE_TOPIC: &str = "device";
pub const MQTT_GROUP_TOPIC: &str = "modhub";
pub const MQTT_SUB_PREFIX: &str = "cmnd";
pub const MQTT_PUB_PREFIX: &str = "stat";
pub const MQTT_TELE_PREFIX: &str = "tele";
pub const MQTT_FULL_TOPIC: &str = "#PREFIX/#TOPIC/";
pub const MQTT_LWT_SUBTOPIC: &str = "LWT";
pub const MQTT_LWT_OFFLINE: &str = "Offline";
pub const MQTT_LWT_ONLINE: &str = "Online";
pub const MQTT_TOPIC_OPTION: &str = "topic";
pub const MQTT_TELEMETRY_OPTION: &str = "telemetry";
pub const MQTT_CLIENT_ID_OPTION: &str = "clientid";
pub const MQTT_GROUP_TOPIC_OPTION: &str = "grptopic";

// ---------------------------------------------------------------------------
// WiFi option set
// ---------------------------------------------------------------------------

/// Fallback policy once the connect budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMethod {
    /// Restart the device.
    Restart,
    /// Host an access point for out-of-band reconfiguration.
    Manager,
    /// Start a new round of attempts, alternating profiles.
    Retry,
    /// Start a new round of attempts, always toggling profile.
    Wait,
}

impl ConfigMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "restart" => Some(Self::Restart),
            "manager" => Some(Self::Manager),
            "retry" => Some(Self::Retry),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Manager => "manager",
            Self::Retry => "retry",
            Self::Wait => "wait",
        }
    }

    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Restart => 0,
            Self::Manager => 1,
            Self::Retry => 2,
            Self::Wait => 3,
        }
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Restart),
            1 => Some(Self::Manager),
            2 => Some(Self::Retry),
            3 => Some(Self::Wait),
            _ => None,
        }
    }
}

/// Station configuration as stored (macros unexpanded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub hostname: String,
    pub ssid1: String,
    pub pwd1: String,
    pub ssid2: String,
    pub pwd2: String,
    pub cfgmethod: ConfigMethod,
    pub ipaddr: Ipv4Addr,
    pub ipmask: Ipv4Addr,
    pub ipgate: Ipv4Addr,
    pub ipdns: Ipv4Addr,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            hostname: WIFI_HOSTNAME.into(),
            ssid1: String::new(),
            pwd1: String::new(),
            ssid2: String::new(),
            pwd2: String::new(),
            cfgmethod: WIFI_CONFIG_METHOD,
            ipaddr: WIFI_IP_ADDRESS,
            ipmask: WIFI_SUBNET_MASK,
            ipgate: WIFI_GATEWAY,
            ipdns: WIFI_DNS,
        }
    }
}

impl WifiConfig {
    pub fn load(settings: &Settings) -> Self {
        let d = Self::default();
        let ip = |key: &str, def: Ipv4Addr| {
            Ipv4Addr::from(settings.get_long(WIFI_ID, key, u32::from(def)))
        };
        Self {
            hostname: settings.get_string(WIFI_ID, WIFI_HOSTNAME_OPTION, &d.hostname),
            ssid1: settings.get_string(WIFI_ID, "ssid1", &d.ssid1),
            pwd1: settings.get_string(WIFI_ID, "pwd1", &d.pwd1),
            ssid2: settings.get_string(WIFI_ID, "ssid2", &d.ssid2),
            pwd2: settings.get_string(WIFI_ID, "pwd2", &d.pwd2),
            cfgmethod: ConfigMethod::from_byte(settings.get_byte(
                WIFI_ID,
                "cfgmethod",
                d.cfgmethod.to_byte(),
            ))
            .unwrap_or(d.cfgmethod),
            ipaddr: ip("ipaddr", d.ipaddr),
            ipmask: ip("ipmask", d.ipmask),
            ipgate: ip("ipgate", d.ipgate),
            ipdns: ip("ipdns", d.ipdns),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.ssid1.is_empty() || !self.ssid2.is_empty()
    }
}

// ---------------------------------------------------------------------------
// MQTT option set
// ---------------------------------------------------------------------------

/// Broker session configuration as stored (macros unexpanded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    pub clientid: String,
    pub host: Ipv4Addr,
    pub port: u16,
    pub user: String,
    pub pwd: String,
    pub reconnect: u16,
    pub telemetry: u16,
    pub topic: String,
    pub grptopic: String,
    pub cmnd: String,
    pub stat: String,
    pub tele: String,
    pub fulltopic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            clientid: MQTT_CLIENT_ID.into(),
            host: MQTT_HOST,
            port: MQTT_PORT,
            user: MQTT_USERNAME.into(),
            pwd: MQTT_PASSWORD.into(),
            reconnect: MQTT_RECONNECT_SECS,
            telemetry: MQTT_TELEMETRY_SECS,
            topic: MQTT_DEVICE_TOPIC.into(),
            grptopic: MQTT_GROUP_TOPIC.into(),
            cmnd: MQTT_SUB_PREFIX.into(),
            stat: MQTT_PUB_PREFIX.into(),
            tele: MQTT_TELE_PREFIX.into(),
            fulltopic: MQTT_FULL_TOPIC.into(),
        }
    }
}

impl MqttConfig {
    pub fn load(settings: &Settings) -> Self {
        let d = Self::default();
        let s = |key: &str, def: &str| settings.get_string(MQTT_ID, key, def);
        Self {
            clientid: s(MQTT_CLIENT_ID_OPTION, &d.clientid),
            host: Ipv4Addr::from(settings.get_long(MQTT_ID, "host", u32::from(d.host))),
            port: settings.get_short(MQTT_ID, "port", d.port),
            user: s("user", &d.user),
            pwd: s("pwd", &d.pwd),
            reconnect: settings.get_short(MQTT_ID, "reconnect", d.reconnect),
            telemetry: settings.get_short(MQTT_ID, MQTT_TELEMETRY_OPTION, d.telemetry),
            topic: s(MQTT_TOPIC_OPTION, &d.topic),
            grptopic: s(MQTT_GROUP_TOPIC_OPTION, &d.grptopic),
            cmnd: s("cmnd", &d.cmnd),
            stat: s("stat", &d.stat),
            tele: s("tele", &d.tele),
            fulltopic: s("fulltopic", &d.fulltopic),
        }
    }

    /// Copy with `#TOPIC` / `#MAC4` expanded in the client id.
    #[must_use]
    pub fn expanded(mut self, settings: &Settings) -> Self {
        self.clientid = settings.expand_macros(&self.clientid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_method_round_trip() {
        for m in [
            ConfigMethod::Restart,
            ConfigMethod::Manager,
            ConfigMethod::Retry,
            ConfigMethod::Wait,
        ] {
            assert_eq!(ConfigMethod::parse(m.as_str()), Some(m));
            assert_eq!(ConfigMethod::from_byte(m.to_byte()), Some(m));
        }
        assert_eq!(ConfigMethod::parse("Manager"), None);
        assert_eq!(ConfigMethod::from_byte(9), None);
    }

    #[test]
    fn wifi_defaults() {
        let cfg = WifiConfig::default();
        assert!(!cfg.has_credentials());
        assert_eq!(cfg.cfgmethod, ConfigMethod::Manager);
        assert_eq!(cfg.ipaddr, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn mqtt_export_shape() {
        let json = serde_json::to_string(&MqttConfig::default()).unwrap();
        assert!(json.contains(r#""host":"192.168.0.4""#));
        assert!(json.contains(r#""port":1883"#));
        assert!(json.contains(r##""fulltopic":"#PREFIX/#TOPIC/""##));
    }

    #[test]
    fn sleep_defaults_in_range() {
        assert!(DEFAULT_SLEEP_TIME_MS <= MAX_SLEEP_TIME_MS);
        assert_eq!(DEFAULT_SLEEP_MODE, SleepMode::Dynamic);
    }
}
