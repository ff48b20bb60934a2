//! Port traits: the hexagonal boundary between the runtime and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Settings / Scheduler / state machines
//! ```
//!
//! Platform adapters (NVS, system timer, WiFi driver, MQTT client) implement
//! these traits.  The runtime consumes them through generics or boxed trait
//! objects, so nothing outside `adapters/` touches ESP-IDF directly.
//!
//! All port errors are typed; callers match every variant.

use std::net::Ipv4Addr;

// ───────────────────────────────────────────────────────────────
// Storage port (settings persistence)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage backing the settings store.
///
/// Keys are namespaced; the runtime uses one namespace for every option.
/// Write operations MUST be atomic.  The ESP-IDF NVS API guarantees this
/// natively; the in-memory simulation achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Remove every key in `namespace`.
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError>;

    /// Entry usage of the backing partition, when the backend tracks it.
    fn stats(&self) -> Option<StorageStats> {
        None
    }
}

/// Entry counts reported by [`StoragePort::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub used: usize,
    pub free: usize,
}

impl<T: StoragePort + ?Sized> StoragePort for Box<T> {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        (**self).read(namespace, key, buf)
    }
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(namespace, key, data)
    }
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        (**self).delete(namespace, key)
    }
    fn exists(&self, namespace: &str, key: &str) -> bool {
        (**self).exists(namespace, key)
    }
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        (**self).erase_namespace(namespace)
    }
    fn stats(&self) -> Option<StorageStats> {
        (**self).stats()
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port (monotonic time)
// ───────────────────────────────────────────────────────────────

/// Monotonic time source for the scheduler.
pub trait Clock {
    /// Microseconds since boot.
    fn now_us(&self) -> u64;

    /// Milliseconds since boot.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}

// ───────────────────────────────────────────────────────────────
// WiFi radio port (station + soft-AP)
// ───────────────────────────────────────────────────────────────

/// Static addressing for the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticIp {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

/// One station connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRequest {
    pub ssid: String,
    pub password: String,
    pub hostname: String,
    /// `None` means DHCP.
    pub static_ip: Option<StaticIp>,
}

/// Link status as reported by the radio driver.  Polled, never awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    NoSsidAvailable,
    ConnectFailed,
    Disconnected,
    Connected,
}

/// Station link details while associated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    /// dBm
    pub rssi: i8,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub mac: [u8; 6],
}

/// Non-blocking WiFi driver boundary.
pub trait WifiRadio {
    /// Start an association attempt.  Returns immediately; progress is
    /// observed through [`link_status`](Self::link_status).
    fn connect(&mut self, request: &StationRequest) -> Result<(), RadioError>;

    fn disconnect(&mut self) -> Result<(), RadioError>;

    fn link_status(&self) -> LinkStatus;

    /// True once DHCP (or static config) produced a usable address.
    fn has_ip(&self) -> bool;

    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;

    fn stop_access_point(&mut self) -> Result<(), RadioError>;

    /// Number of stations associated with the soft-AP.
    fn station_count(&self) -> usize;

    /// Details of the current station link.  `None` when not associated.
    fn link_info(&self) -> Option<LinkInfo> {
        None
    }
}

impl<T: WifiRadio + ?Sized> WifiRadio for Box<T> {
    fn connect(&mut self, request: &StationRequest) -> Result<(), RadioError> {
        (**self).connect(request)
    }
    fn disconnect(&mut self) -> Result<(), RadioError> {
        (**self).disconnect()
    }
    fn link_status(&self) -> LinkStatus {
        (**self).link_status()
    }
    fn has_ip(&self) -> bool {
        (**self).has_ip()
    }
    fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
        (**self).start_access_point(ssid, password)
    }
    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        (**self).stop_access_point()
    }
    fn station_count(&self) -> usize {
        (**self).station_count()
    }
    fn link_info(&self) -> Option<LinkInfo> {
        (**self).link_info()
    }
}

// ───────────────────────────────────────────────────────────────
// MQTT transport port (broker session I/O)
// ───────────────────────────────────────────────────────────────

/// Handshake parameters sent once the socket is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keepalive_secs: u16,
    pub will_topic: String,
    pub will_payload: String,
}

/// Progress reported by the transport.  Drained with [`MqttTransport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// TCP connection established.
    Opened,
    /// TCP connection could not be established.
    OpenFailed,
    /// Broker answered the handshake.
    ConnAck { accepted: bool },
    /// Broker acknowledged the subscription request.
    SubAck,
    /// Inbound publish.
    Message { topic: String, payload: String },
    /// Connection lost or closed.
    Closed,
}

/// Non-blocking MQTT session boundary.
pub trait MqttTransport {
    /// Begin opening a connection.  Completion arrives as
    /// [`TransportEvent::Opened`] or [`TransportEvent::OpenFailed`].
    fn open(&mut self, host: Ipv4Addr, port: u16) -> Result<(), TransportError>;

    fn handshake(&mut self, options: &SessionOptions) -> Result<(), TransportError>;

    fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError>;

    fn close(&mut self);

    /// Next pending event, if any.
    fn poll(&mut self) -> Option<TransportEvent>;
}

impl<T: MqttTransport + ?Sized> MqttTransport for Box<T> {
    fn open(&mut self, host: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        (**self).open(host, port)
    }
    fn handshake(&mut self, options: &SessionOptions) -> Result<(), TransportError> {
        (**self).handshake(options)
    }
    fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        (**self).subscribe(topics)
    }
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        (**self).publish(topic, payload, retain)
    }
    fn close(&mut self) {
        (**self).close();
    }
    fn poll(&mut self) -> Option<TransportEvent> {
        (**self).poll()
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// The store is already borrowed by an outstanding operation.
    Busy,
}

/// Errors from [`WifiRadio`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// SSID empty or longer than 32 bytes.
    InvalidSsid,
    /// Password longer than 64 bytes.
    InvalidPassword,
    /// Driver call failed.
    Driver,
}

/// Errors from [`MqttTransport`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotConnected,
    /// Client could not be created or the request was refused.
    Refused,
    Io,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Busy => write!(f, "storage busy"),
        }
    }
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Driver => write!(f, "WiFi driver error"),
        }
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Refused => write!(f, "request refused"),
            Self::Io => write!(f, "transport I/O error"),
        }
    }
}
