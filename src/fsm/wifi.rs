//! Station WiFi connectivity state machine.
//!
//! Driven by [`on_second`](WifiStateMachine::on_second) once per second.
//! Connection attempts are issued to the [`WifiRadio`] port and their
//! outcome is polled on the next check; nothing here blocks.
//!
//! Each failed check spends one unit of the retry budget on a new attempt.
//! Once the budget is spent the machine enters `Reconfiguring` and, on the
//! following second, applies the configured fallback policy.

use std::net::Ipv4Addr;

use log::{debug, error, info, trace, warn};

use super::Countdown;
use crate::app::ports::{LinkStatus, StaticIp, StationRequest, WifiRadio};
use crate::config::{self, ConfigMethod, WifiConfig};
use crate::events::{ConnectivityKind, Event, SystemEventKind};

/// Credential set used for the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Primary,
    Secondary,
}

impl Profile {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    pub const fn number(self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Idle,
    Connecting(Profile),
    Connected,
    ApManagerMode,
    /// Retry budget spent; the policy is applied on the next second.
    Reconfiguring(ConfigMethod),
}

pub struct WifiStateMachine<R: WifiRadio> {
    radio: R,
    cfg: WifiConfig,
    state: WifiState,
    profile: Profile,
    retry_budget: u8,
    retries_left: u8,
    /// Connect requests issued since the budget was last refilled.
    attempts: u32,
    check: Countdown,
    inactivity: Countdown,
    /// Delayed reconfiguration after an option change.
    pending_reconfigure: Option<u8>,
    reachable: bool,
    events: Vec<Event>,
}

impl<R: WifiRadio> WifiStateMachine<R> {
    /// `cfg` must already have its hostname macros expanded.
    pub fn new(radio: R, cfg: WifiConfig) -> Self {
        Self {
            radio,
            cfg,
            state: WifiState::Idle,
            profile: Profile::Primary,
            retry_budget: config::WIFI_CONNECT_RETRIES,
            retries_left: 0,
            attempts: 0,
            check: Countdown::default(),
            inactivity: Countdown::default(),
            pending_reconfigure: None,
            reachable: false,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_retry_budget(mut self, budget: u8) -> Self {
        self.retry_budget = budget;
        self
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_left(&self) -> u8 {
        self.retries_left
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn in_manager_mode(&self) -> bool {
        self.state == WifiState::ApManagerMode
    }

    pub fn config(&self) -> &WifiConfig {
        &self.cfg
    }

    pub fn set_config(&mut self, cfg: WifiConfig) {
        self.cfg = cfg;
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Drain the buffered bus events.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ── Driving ───────────────────────────────────────────────

    /// Leave `Idle`.  The first check runs on the next second.
    pub fn begin(&mut self) {
        self.check.set(1);
        self.retries_left = if self.cfg.has_credentials() {
            self.retry_budget
        } else {
            0
        };
        self.attempts = 0;
        self.state = WifiState::Connecting(self.profile);
        self.reachable = false;
        self.push_connectivity(ConnectivityKind::Wifi, false);
        info!(
            "WiFi: starting, {} connect attempts available",
            self.retries_left
        );
    }

    /// Schedule a reconfiguration after an option change.  The configured
    /// fallback method is applied once the delay runs out.  Ignored while
    /// the access point manager is active.
    pub fn request_reinit(&mut self) {
        if self.in_manager_mode() {
            debug!("WiFi: reinit ignored in manager mode");
            return;
        }
        self.pending_reconfigure = Some(config::WIFI_RECONFIG_DELAY_SECS);
    }

    /// Enter access point manager mode now.
    pub fn start_manager(&mut self) {
        self.pending_reconfigure = None;
        self.reconfigure(ConfigMethod::Manager);
    }

    /// One-second step.
    pub fn on_second(&mut self) {
        if let Some(delay) = self.pending_reconfigure {
            if delay > 0 {
                self.pending_reconfigure = Some(delay - 1);
            } else {
                self.pending_reconfigure = None;
                self.reconfigure(self.cfg.cfgmethod);
            }
            return;
        }

        match self.state {
            WifiState::Idle => {}
            WifiState::Reconfiguring(method) => self.reconfigure(method),
            WifiState::ApManagerMode => {
                if self.radio.station_count() > 0 {
                    self.inactivity.set(config::WIFI_INACTIVITY_SECS);
                } else if self.inactivity.tick() || !self.inactivity.is_armed() {
                    info!("WiFi: manager inactive, retrying station mode");
                    self.reconfigure(ConfigMethod::Retry);
                }
            }
            WifiState::Connecting(_) | WifiState::Connected => {
                if self.check.tick() {
                    self.check_connection();
                }
            }
        }
    }

    fn check_connection(&mut self) {
        let status = self.radio.link_status();
        trace!("WiFi: link status {:?} ({})", status, self.retries_left);

        if status == LinkStatus::Connected && self.radio.has_ip() {
            self.retries_left = self.retry_budget;
            self.attempts = 0;
            self.check.set(config::WIFI_CHECK_SECS);
            if !self.reachable {
                info!("WiFi: connected (profile {})", self.profile.number());
                self.reachable = true;
                self.push_connectivity(ConnectivityKind::Wifi, true);
            }
            self.state = WifiState::Connected;
            return;
        }

        if self.reachable {
            info!("WiFi: disconnected");
            self.reachable = false;
            self.push_connectivity(ConnectivityKind::Wifi, false);
        }

        match status {
            LinkStatus::Connected => warn!("WiFi: associated but no IP address received"),
            LinkStatus::NoSsidAvailable => warn!("WiFi: access point cannot be reached"),
            LinkStatus::ConnectFailed => warn!("WiFi: connect failed, wrong password?"),
            LinkStatus::Disconnected => self.check.set(config::WIFI_DISCONNECTED_RECHECK_SECS),
            LinkStatus::Idle => {}
        }

        if self.retries_left > 0 {
            let keep_profile =
                self.cfg.cfgmethod != ConfigMethod::Wait && self.retries_left % 2 == 0;
            self.connect(!keep_profile);
            self.check.set(config::WIFI_CONNECT_DELAY_SECS);
            self.retries_left -= 1;
        } else {
            info!(
                "WiFi: retry budget spent, fallback '{}'",
                self.cfg.cfgmethod.as_str()
            );
            self.state = WifiState::Reconfiguring(self.cfg.cfgmethod);
        }
    }

    fn connect(&mut self, toggle: bool) {
        if toggle {
            self.profile = self.profile.toggled();
        }
        if self.ssid(self.profile).is_empty() {
            self.profile = self.profile.toggled();
        }
        self.state = WifiState::Connecting(self.profile);

        let ssid = self.ssid(self.profile).to_owned();
        if ssid.is_empty() {
            return;
        }
        let request = StationRequest {
            password: self.password(self.profile).to_owned(),
            hostname: self.cfg.hostname.clone(),
            static_ip: (self.cfg.ipaddr != Ipv4Addr::UNSPECIFIED).then(|| StaticIp {
                address: self.cfg.ipaddr,
                netmask: self.cfg.ipmask,
                gateway: self.cfg.ipgate,
                dns: self.cfg.ipdns,
            }),
            ssid,
        };

        self.disconnect_radio();
        self.attempts += 1;
        info!(
            "WiFi: connecting to AP #{} '{}' as {} ({})",
            self.profile.number(),
            request.ssid,
            request.hostname,
            self.retries_left
        );
        if let Err(e) = self.radio.connect(&request) {
            warn!("WiFi: connect request rejected: {}", e);
        }
    }

    fn disconnect_radio(&mut self) {
        if let Err(e) = self.radio.disconnect() {
            debug!("WiFi: disconnect failed: {}", e);
        }
    }

    fn reconfigure(&mut self, method: ConfigMethod) {
        self.check.set(1);
        self.retries_left = self.retry_budget;
        self.attempts = 0;
        self.disconnect_radio();
        if self.reachable {
            self.reachable = false;
            self.push_connectivity(ConnectivityKind::Wifi, false);
        }
        if self.in_manager_mode() && method != ConfigMethod::Manager {
            if let Err(e) = self.radio.stop_access_point() {
                warn!("WiFi: failed to stop access point: {}", e);
            }
            self.push_connectivity(ConnectivityKind::AccessPoint, false);
        }

        match method {
            ConfigMethod::Restart => {
                info!("WiFi: requesting restart");
                self.events
                    .push(Event::System(SystemEventKind::PendingRestart));
                self.state = WifiState::Idle;
            }
            ConfigMethod::Manager => {
                if let Err(e) = self
                    .radio
                    .start_access_point(config::WIFI_AP_SSID, config::WIFI_AP_PASSWORD)
                {
                    error!("WiFi: failed to start access point: {}", e);
                    self.state = WifiState::Connecting(self.profile);
                    return;
                }
                self.inactivity.set(config::WIFI_INACTIVITY_SECS);
                self.state = WifiState::ApManagerMode;
                info!("WiFi: manager started as '{}'", config::WIFI_AP_SSID);
                self.push_connectivity(ConnectivityKind::AccessPoint, true);
            }
            ConfigMethod::Retry | ConfigMethod::Wait => {
                self.state = WifiState::Connecting(self.profile);
            }
        }
    }

    fn ssid(&self, profile: Profile) -> &str {
        match profile {
            Profile::Primary => &self.cfg.ssid1,
            Profile::Secondary => &self.cfg.ssid2,
        }
    }

    fn password(&self, profile: Profile) -> &str {
        match profile {
            Profile::Primary => &self.cfg.pwd1,
            Profile::Secondary => &self.cfg.pwd2,
        }
    }

    fn push_connectivity(&mut self, kind: ConnectivityKind, connected: bool) {
        self.events.push(Event::Connectivity { kind, connected });
    }
}
