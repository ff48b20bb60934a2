//! MQTT transport adapter.
//!
//! Implements [`MqttTransport`], the boundary the MQTT state machine drives.
//!
//! - **`target_os = "espidf"`**: [`EspTransport`] over `EspMqttClient`.  The
//!   client runs on its own task; its callback only queues
//!   [`TransportEvent`]s, which the state machine drains from the main loop.
//! - **all other targets**: [`SimTransport`], an in-process broker stand-in
//!   whose clones share state so tests can inject messages and faults.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use log::debug;

use crate::app::ports::{MqttTransport, SessionOptions, TransportError, TransportEvent};

// ───────────────────────────────────────────────────────────────
// Simulation transport
// ───────────────────────────────────────────────────────────────

/// One message the device sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

struct SimState {
    reachable: bool,
    accept: bool,
    open: bool,
    pending: VecDeque<TransportEvent>,
    sessions: Vec<SessionOptions>,
    subscriptions: Vec<String>,
    published: Vec<Published>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            reachable: true,
            accept: true,
            open: false,
            pending: VecDeque::new(),
            sessions: Vec::new(),
            subscriptions: Vec::new(),
            published: Vec::new(),
        }
    }
}

/// Host-side broker connection.  Every request is answered on the next
/// `poll`.
#[derive(Clone, Default)]
pub struct SimTransport {
    state: Rc<RefCell<SimState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `open` succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.borrow_mut().reachable = reachable;
    }

    /// Whether the broker accepts the handshake.
    pub fn set_accept(&self, accept: bool) {
        self.state.borrow_mut().accept = accept;
    }

    /// Queue an inbound publish.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state
            .borrow_mut()
            .pending
            .push_back(TransportEvent::Message {
                topic: topic.into(),
                payload: payload.into(),
            });
    }

    /// Broker-side disconnect.
    pub fn drop_connection(&self) {
        let mut s = self.state.borrow_mut();
        if s.open {
            s.open = false;
            s.pending.push_back(TransportEvent::Closed);
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn sessions(&self) -> Vec<SessionOptions> {
        self.state.borrow().sessions.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.borrow().published.clone()
    }

    /// Published payloads for `topic`, oldest first.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }
}

impl MqttTransport for SimTransport {
    fn open(&mut self, host: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        let mut s = self.state.borrow_mut();
        debug!("MQTT(sim): open {}:{}", host, port);
        if s.reachable {
            s.open = true;
            s.pending.push_back(TransportEvent::Opened);
        } else {
            s.pending.push_back(TransportEvent::OpenFailed);
        }
        Ok(())
    }

    fn handshake(&mut self, options: &SessionOptions) -> Result<(), TransportError> {
        let mut s = self.state.borrow_mut();
        if !s.open {
            return Err(TransportError::NotConnected);
        }
        s.sessions.push(options.clone());
        let accepted = s.accept;
        s.pending.push_back(TransportEvent::ConnAck { accepted });
        Ok(())
    }

    fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let mut s = self.state.borrow_mut();
        if !s.open {
            return Err(TransportError::NotConnected);
        }
        s.subscriptions.extend_from_slice(topics);
        s.pending.push_back(TransportEvent::SubAck);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        let mut s = self.state.borrow_mut();
        if !s.open {
            return Err(TransportError::NotConnected);
        }
        s.published.push(Published {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        });
        Ok(())
    }

    fn close(&mut self) {
        let mut s = self.state.borrow_mut();
        if s.open {
            s.open = false;
            s.subscriptions.clear();
            s.pending.push_back(TransportEvent::Closed);
        }
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.state.borrow_mut().pending.pop_front()
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF transport
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspTransport;

#[cfg(target_os = "espidf")]
mod esp {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use esp_idf_svc::mqtt::client::{
        EspMqttClient, EventPayload, LwtConfiguration, MqttClientConfiguration, QoS,
    };
    use log::warn;

    use crate::app::ports::{MqttTransport, SessionOptions, TransportError, TransportEvent};

    type Queue = Arc<Mutex<VecDeque<TransportEvent>>>;

    fn push(queue: &Queue, event: TransportEvent) {
        if let Ok(mut q) = queue.lock() {
            q.push_back(event);
        }
    }

    /// The IDF client connects as part of construction, so `open` only
    /// records the broker address and `handshake` creates the client.
    #[derive(Default)]
    pub struct EspTransport {
        broker: Option<(Ipv4Addr, u16)>,
        client: Option<EspMqttClient<'static>>,
        queue: Queue,
    }

    impl EspTransport {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl MqttTransport for EspTransport {
        fn open(&mut self, host: Ipv4Addr, port: u16) -> Result<(), TransportError> {
            self.broker = Some((host, port));
            push(&self.queue, TransportEvent::Opened);
            Ok(())
        }

        fn handshake(&mut self, options: &SessionOptions) -> Result<(), TransportError> {
            let (host, port) = self.broker.ok_or(TransportError::NotConnected)?;
            let url = format!("mqtt://{}:{}", host, port);
            let conf = MqttClientConfiguration {
                client_id: Some(&options.client_id),
                username: (!options.username.is_empty()).then_some(options.username.as_str()),
                password: (!options.password.is_empty()).then_some(options.password.as_str()),
                keep_alive_interval: Some(Duration::from_secs(u64::from(options.keepalive_secs))),
                lwt: Some(LwtConfiguration {
                    topic: &options.will_topic,
                    payload: options.will_payload.as_bytes(),
                    qos: QoS::AtMostOnce,
                    retain: true,
                }),
                disable_clean_session: false,
                ..Default::default()
            };
            let queue = self.queue.clone();
            let client = EspMqttClient::new_cb(&url, &conf, move |event| {
                let mapped = match event.payload() {
                    EventPayload::Connected(_) => TransportEvent::ConnAck { accepted: true },
                    EventPayload::Subscribed(_) => TransportEvent::SubAck,
                    EventPayload::Disconnected => TransportEvent::Closed,
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        ..
                    } => TransportEvent::Message {
                        topic: topic.into(),
                        payload: String::from_utf8_lossy(data).into_owned(),
                    },
                    EventPayload::Error(e) => {
                        warn!("MQTT: client error {:?}", e);
                        return;
                    }
                    _ => return,
                };
                push(&queue, mapped);
            })
            .map_err(|e| {
                warn!("MQTT: client creation failed: {}", e);
                TransportError::Refused
            })?;
            self.client = Some(client);
            Ok(())
        }

        fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
            let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
            for topic in topics {
                client
                    .subscribe(topic, QoS::AtMostOnce)
                    .map_err(|_| TransportError::Io)?;
            }
            Ok(())
        }

        fn publish(
            &mut self,
            topic: &str,
            payload: &str,
            retain: bool,
        ) -> Result<(), TransportError> {
            let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
            client
                .enqueue(topic, QoS::AtMostOnce, retain, payload.as_bytes())
                .map(|_| ())
                .map_err(|_| TransportError::Io)
        }

        fn close(&mut self) {
            if self.client.take().is_some() {
                push(&self.queue, TransportEvent::Closed);
            }
            self.broker = None;
        }

        fn poll(&mut self) -> Option<TransportEvent> {
            self.queue.lock().ok()?.pop_front()
        }
    }
}
