//! Persistent settings store.
//!
//! Every option of every component lives in one storage namespace under a
//! [`SettingsKey`] built from the component id and the option name.  Values
//! are postcard-encoded before they reach the [`StoragePort`].
//!
//! Two global options, the duty-cycle sleep mode and sleep time, are read by
//! the scheduler on every iteration and are therefore mirrored in memory.

pub mod options;

use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort, StorageStats};
use crate::config;

pub use options::{OptionHandler, StringConstraints};

/// Maximum key length accepted by the storage backend.
pub const MAX_KEY_LEN: usize = 15;

/// Largest encoded value accepted by [`Settings`].
pub const MAX_VALUE_LEN: usize = 512;

const SLEEP_MODE_KEY: &str = "SleepMode";
const SLEEP_TIME_KEY: &str = "SleepTime";

// ---------------------------------------------------------------------------
// Three-phase action
// ---------------------------------------------------------------------------

/// Option handler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    /// Report the current value.
    Read,
    /// Validate a new value without storing it.
    Verify,
    /// Validate and store.
    Save,
}

// ---------------------------------------------------------------------------
// Sleep mode
// ---------------------------------------------------------------------------

/// Scheduler duty-cycle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepMode {
    /// Always sleep the full quantum.
    Static,
    /// Sleep only what the iteration's work left of the quantum.
    Dynamic,
}

impl SleepMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }

    const fn to_byte(self) -> u8 {
        match self {
            Self::Static => 0,
            Self::Dynamic => 1,
        }
    }

    const fn from_byte(b: u8) -> Self {
        if b == 0 { Self::Static } else { Self::Dynamic }
    }
}

impl fmt::Display for SleepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Storage key
// ---------------------------------------------------------------------------

/// Component id + option name, capped at [`MAX_KEY_LEN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingsKey(heapless::String<MAX_KEY_LEN>);

impl SettingsKey {
    /// The plain concatenation when it fits, otherwise the first 6
    /// characters of the id followed by the first 9 of the option.
    pub fn new(component: &str, option: &str) -> Self {
        let mut key = heapless::String::new();
        if component.len() + option.len() <= MAX_KEY_LEN {
            push_truncated(&mut key, component, MAX_KEY_LEN);
            push_truncated(&mut key, option, MAX_KEY_LEN);
        } else {
            push_truncated(&mut key, component, 6);
            push_truncated(&mut key, option, 9);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Append up to `max` characters of `s`, stopping at capacity.
fn push_truncated(out: &mut heapless::String<MAX_KEY_LEN>, s: &str, max: usize) {
    for c in s.chars().take(max) {
        if out.push(c).is_err() {
            break;
        }
    }
}

impl fmt::Display for SettingsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

struct SettingsInner {
    store: RefCell<Box<dyn StoragePort>>,
    namespace: &'static str,
    sleep_mode: Cell<SleepMode>,
    sleep_time: Cell<u8>,
    device_suffix: u16,
}

/// Cheaply cloneable handle to the settings namespace.
#[derive(Clone)]
pub struct Settings {
    inner: Rc<SettingsInner>,
}

impl Settings {
    /// Open the settings namespace on `store` and load the sleep mirrors.
    /// `device_suffix` replaces the `#MAC4` macro.
    pub fn new(store: Box<dyn StoragePort>, device_suffix: u16) -> Self {
        let settings = Self {
            inner: Rc::new(SettingsInner {
                store: RefCell::new(store),
                namespace: config::SETTINGS_NAMESPACE,
                sleep_mode: Cell::new(config::DEFAULT_SLEEP_MODE),
                sleep_time: Cell::new(config::DEFAULT_SLEEP_TIME_MS),
                device_suffix,
            }),
        };
        settings.reload_mirrors();
        settings
    }

    fn reload_mirrors(&self) {
        let mode = self
            .load::<u8>(SLEEP_MODE_KEY)
            .map_or(config::DEFAULT_SLEEP_MODE, SleepMode::from_byte);
        let time = self
            .load::<u8>(SLEEP_TIME_KEY)
            .unwrap_or(config::DEFAULT_SLEEP_TIME_MS)
            .min(config::MAX_SLEEP_TIME_MS);
        self.inner.sleep_mode.set(mode);
        self.inner.sleep_time.set(time);
        debug!("Settings: sleep mode={} time={}ms", mode, time);
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Ok(store) = self.inner.store.try_borrow() else {
            warn!("Settings: store busy, reading '{}' as default", key);
            return None;
        };
        let mut buf = [0u8; MAX_VALUE_LEN];
        let len = store.read(self.inner.namespace, key, &mut buf).ok()?;
        postcard::from_bytes(&buf[..len]).ok()
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(value).map_err(|_| StorageError::IoError)?;
        if bytes.len() > MAX_VALUE_LEN {
            return Err(StorageError::Full);
        }
        let mut store = self
            .inner
            .store
            .try_borrow_mut()
            .map_err(|_| StorageError::Busy)?;
        store.write(self.inner.namespace, key, &bytes)
    }

    // ── Typed accessors ───────────────────────────────────────

    pub fn get_byte(&self, component: &str, key: &str, default: u8) -> u8 {
        self.load(SettingsKey::new(component, key).as_str())
            .unwrap_or(default)
    }

    pub fn get_short(&self, component: &str, key: &str, default: u16) -> u16 {
        self.load(SettingsKey::new(component, key).as_str())
            .unwrap_or(default)
    }

    pub fn get_long(&self, component: &str, key: &str, default: u32) -> u32 {
        self.load(SettingsKey::new(component, key).as_str())
            .unwrap_or(default)
    }

    pub fn get_string(&self, component: &str, key: &str, default: &str) -> String {
        self.load(SettingsKey::new(component, key).as_str())
            .unwrap_or_else(|| default.to_owned())
    }

    /// [`get_string`](Self::get_string) with `#TOPIC` and `#MAC4` expanded.
    pub fn get_macro_string(&self, component: &str, key: &str, default: &str) -> String {
        self.expand_macros(&self.get_string(component, key, default))
    }

    pub fn set_byte(&self, component: &str, key: &str, value: u8) -> Result<(), StorageError> {
        self.save(SettingsKey::new(component, key).as_str(), &value)
    }

    pub fn set_short(&self, component: &str, key: &str, value: u16) -> Result<(), StorageError> {
        self.save(SettingsKey::new(component, key).as_str(), &value)
    }

    pub fn set_long(&self, component: &str, key: &str, value: u32) -> Result<(), StorageError> {
        self.save(SettingsKey::new(component, key).as_str(), &value)
    }

    pub fn set_string(&self, component: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.save(SettingsKey::new(component, key).as_str(), value)
    }

    /// Whether `value` encodes within [`MAX_VALUE_LEN`].
    pub fn fits_string(value: &str) -> bool {
        postcard::to_allocvec(value).is_ok_and(|bytes| bytes.len() <= MAX_VALUE_LEN)
    }

    /// Entry usage of the backing store.  `None` while the store is busy
    /// or when the backend does not track it.
    pub fn storage_stats(&self) -> Option<StorageStats> {
        self.inner.store.try_borrow().ok()?.stats()
    }

    pub fn contains(&self, component: &str, key: &str) -> bool {
        self.inner.store.try_borrow().is_ok_and(|store| {
            store.exists(
                self.inner.namespace,
                SettingsKey::new(component, key).as_str(),
            )
        })
    }

    /// Wipe every stored option and reset the mirrors.
    pub fn clear(&self) -> Result<(), StorageError> {
        {
            let mut store = self
                .inner
                .store
                .try_borrow_mut()
                .map_err(|_| StorageError::Busy)?;
            store.erase_namespace(self.inner.namespace)?;
        }
        self.reload_mirrors();
        Ok(())
    }

    // ── Sleep mirrors ─────────────────────────────────────────

    pub fn sleep_mode(&self) -> SleepMode {
        self.inner.sleep_mode.get()
    }

    pub fn sleep_time_ms(&self) -> u8 {
        self.inner.sleep_time.get()
    }

    pub fn set_sleep_mode(&self, mode: SleepMode) -> Result<(), StorageError> {
        self.save(SLEEP_MODE_KEY, &mode.to_byte())?;
        self.inner.sleep_mode.set(mode);
        Ok(())
    }

    /// Values above the configured maximum are clamped.
    pub fn set_sleep_time_ms(&self, ms: u8) -> Result<(), StorageError> {
        let ms = ms.min(config::MAX_SLEEP_TIME_MS);
        self.save(SLEEP_TIME_KEY, &ms)?;
        self.inner.sleep_time.set(ms);
        Ok(())
    }

    // ── Macros ────────────────────────────────────────────────

    /// Device-unique number substituted for `#MAC4`.
    pub fn device_suffix(&self) -> u16 {
        self.inner.device_suffix
    }

    /// Substitute `#TOPIC` with the MQTT device topic and `#MAC4` with the
    /// device suffix.
    pub fn expand_macros(&self, value: &str) -> String {
        let mut out = value.to_owned();
        if out.contains("#TOPIC") {
            let topic = self.get_string(
                config::MQTT_ID,
                config::MQTT_TOPIC_OPTION,
                config::MQTT_DEVICE_TOPIC,
            );
            out = out.replace("#TOPIC", &topic);
        }
        if out.contains("#MAC4") {
            out = out.replace("#MAC4", &self.inner.device_suffix.to_string());
        }
        out
    }
}
