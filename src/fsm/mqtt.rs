//! MQTT session reconnect state machine.
//!
//! ```text
//!   Disconnected ──reconnect()──▶ Connecting ──Opened──▶ handshake
//!        ▲                            │                    │ ConnAck ok
//!        │ Closed / OpenFailed        │                    ▼
//!        └────────────────────────────┴──── Connected ◀── SubAck
//! ```
//!
//! Delivery is at-most-once: publishes while not connected are dropped.
//! A `reconnect()` issued while connected only raises a flag; the session
//! is closed on the next [`poll`](MqttStateMachine::poll) once the
//! transport has no events pending.

use log::{debug, error, info, warn};

use crate::app::commands;
use crate::app::ports::{MqttTransport, SessionOptions, TransportEvent};
use crate::config::{self, MqttConfig};
use crate::events::{ConnectivityKind, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttState {
    Disconnected,
    Connecting,
    Connected,
}

/// First element of a topic built from the `fulltopic` template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicPrefix {
    Command,
    Status,
    Telemetry,
}

/// Expand the `fulltopic` template: substitute `#PREFIX` and `#TOPIC`,
/// drop any remaining `#`, collapse `//`, ensure a trailing `/`, then
/// append `subtopic`.
pub fn build_topic(fulltopic: &str, prefix: &str, topic: &str, subtopic: &str) -> String {
    let mut out = fulltopic.replace("#PREFIX", prefix).replace("#TOPIC", topic);
    out.retain(|c| c != '#');
    while out.contains("//") {
        out = out.replace("//", "/");
    }
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(subtopic);
    out
}

pub struct MqttStateMachine<T: MqttTransport> {
    transport: T,
    cfg: MqttConfig,
    state: MqttState,
    retry: u16,
    /// Handshake accepted; the socket is ours to close.
    session_open: bool,
    reconnect_deferred: bool,
    wifi_up: bool,
    started: bool,
    events: Vec<Event>,
    commands: Vec<String>,
}

impl<T: MqttTransport> MqttStateMachine<T> {
    /// `cfg` must already have its client id macros expanded.
    pub fn new(transport: T, cfg: MqttConfig) -> Self {
        Self {
            transport,
            cfg,
            state: MqttState::Disconnected,
            retry: 0,
            session_open: false,
            reconnect_deferred: false,
            wifi_up: false,
            started: false,
            events: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn state(&self) -> MqttState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == MqttState::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_deferred
    }

    pub fn retry_remaining(&self) -> u16 {
        self.retry
    }

    pub fn config(&self) -> &MqttConfig {
        &self.cfg
    }

    pub fn set_config(&mut self, cfg: MqttConfig) {
        self.cfg = cfg;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Commands parsed from inbound messages, oldest first.
    pub fn take_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.commands)
    }

    // ── Inputs ────────────────────────────────────────────────

    /// WiFi reachability.  The first positive report starts the session.
    pub fn on_wifi(&mut self, connected: bool) {
        self.wifi_up = connected;
        if connected && !self.started {
            self.started = true;
            self.reconnect();
        }
    }

    /// One-second step: count down and retry while disconnected.
    pub fn on_second(&mut self) {
        if self.state != MqttState::Disconnected || !self.wifi_up {
            return;
        }
        if self.retry == 0 {
            self.retry = self.cfg.reconnect;
            self.reconnect();
        } else {
            self.retry -= 1;
        }
    }

    /// Open a session, or flag a reconnect if one is already up.
    pub fn reconnect(&mut self) {
        match self.state {
            MqttState::Connected => {
                if !self.reconnect_deferred {
                    debug!("MQTT: reconnect deferred until idle");
                }
                self.reconnect_deferred = true;
            }
            MqttState::Connecting => {}
            MqttState::Disconnected => {
                info!("MQTT: connecting to {}:{}", self.cfg.host, self.cfg.port);
                self.state = MqttState::Connecting;
                if let Err(e) = self.transport.open(self.cfg.host, self.cfg.port) {
                    error!("MQTT: open failed: {}", e);
                    self.drop_session();
                }
            }
        }
    }

    /// Drain transport events, then apply a deferred reconnect.
    pub fn poll(&mut self) {
        while let Some(event) = self.transport.poll() {
            self.on_transport(event);
        }
        if self.reconnect_deferred && self.session_open {
            self.reconnect_deferred = false;
            info!("MQTT: closing session for reconnect");
            self.transport.close();
            self.drop_session();
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.retry = self.cfg.reconnect;
                let options = self.session_options();
                if let Err(e) = self.transport.handshake(&options) {
                    error!("MQTT: handshake failed: {}", e);
                    self.transport.close();
                    self.drop_session();
                }
            }
            TransportEvent::OpenFailed => {
                warn!("MQTT: connection to {} failed", self.cfg.host);
                self.drop_session();
            }
            TransportEvent::ConnAck { accepted: false } => {
                info!("MQTT: broker refused the session");
                self.transport.close();
                self.drop_session();
            }
            TransportEvent::ConnAck { accepted: true } => {
                let topics = [
                    self.topic_for(TopicPrefix::Command, &self.cfg.topic, "#"),
                    self.topic_for(TopicPrefix::Command, &self.cfg.grptopic, "#"),
                    self.topic_for(TopicPrefix::Command, &self.cfg.clientid, "#"),
                ];
                self.session_open = true;
                if let Err(e) = self.transport.subscribe(&topics) {
                    error!("MQTT: subscribe failed: {}", e);
                }
            }
            TransportEvent::SubAck => {
                if self.state != MqttState::Connected {
                    self.state = MqttState::Connected;
                    info!("MQTT: connected as {}", self.cfg.clientid);
                    self.events.push(Event::Connectivity {
                        kind: ConnectivityKind::Mqtt,
                        connected: true,
                    });
                    let lwt = self.topic_for(
                        TopicPrefix::Telemetry,
                        &self.cfg.topic,
                        config::MQTT_LWT_SUBTOPIC,
                    );
                    self.publish_raw(&lwt, config::MQTT_LWT_ONLINE, true);
                }
            }
            TransportEvent::Message { topic, payload } => {
                debug!("MQTT: message on {}", topic);
                match commands::command_from_message(&topic, &payload) {
                    Some(command) => self.commands.push(command),
                    None => warn!("MQTT: no command in topic '{}'", topic),
                }
            }
            TransportEvent::Closed => {
                if self.state != MqttState::Disconnected {
                    info!("MQTT: connection closed");
                    self.drop_session();
                }
            }
        }
    }

    fn drop_session(&mut self) {
        self.session_open = false;
        self.state = MqttState::Disconnected;
        self.events.push(Event::Connectivity {
            kind: ConnectivityKind::Mqtt,
            connected: false,
        });
    }

    fn session_options(&self) -> SessionOptions {
        let with_auth = !self.cfg.user.is_empty() && !self.cfg.pwd.is_empty();
        SessionOptions {
            client_id: self.cfg.clientid.clone(),
            username: if with_auth { self.cfg.user.clone() } else { String::new() },
            password: if with_auth { self.cfg.pwd.clone() } else { String::new() },
            keepalive_secs: config::MQTT_KEEPALIVE_SECS,
            will_topic: self.topic_for(
                TopicPrefix::Telemetry,
                &self.cfg.topic,
                config::MQTT_LWT_SUBTOPIC,
            ),
            will_payload: config::MQTT_LWT_OFFLINE.into(),
        }
    }

    // ── Outputs ───────────────────────────────────────────────

    pub fn topic_for(&self, prefix: TopicPrefix, topic: &str, subtopic: &str) -> String {
        let prefix = match prefix {
            TopicPrefix::Command => &self.cfg.cmnd,
            TopicPrefix::Status => &self.cfg.stat,
            TopicPrefix::Telemetry => &self.cfg.tele,
        };
        build_topic(&self.cfg.fulltopic, prefix, topic, subtopic)
    }

    /// Publish under the device topic.  Dropped while not connected.
    pub fn publish(&mut self, prefix: TopicPrefix, subtopic: &str, payload: &str) -> bool {
        let topic = self.topic_for(prefix, &self.cfg.topic, subtopic);
        self.publish_raw(&topic, payload, false)
    }

    fn publish_raw(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if self.state != MqttState::Connected {
            debug!("MQTT: {} dropped (not connected)", topic);
            return false;
        }
        match self.transport.publish(topic, payload, retain) {
            Ok(()) => true,
            Err(e) => {
                warn!("MQTT: publish to {} failed: {}", topic, e);
                false
            }
        }
    }
}
