//! Typed option handlers.
//!
//! Components implement [`Component::handle_option`](crate::component::Component::handle_option)
//! by matching the key and delegating to one of these helpers, which carry
//! out the READ / VERIFY / SAVE contract for a value shape:
//!
//! - `Verify` validates and never writes.
//! - `Save` validates, writes, and reports `OkReinit` when the stored value
//!   changed and the option is marked important.
//! - The detail is always the stored value after the call.

use core::fmt::Display;
use core::str::FromStr;
use std::net::Ipv4Addr;

use log::error;

use super::{Settings, SettingsAction};
use crate::app::ports::StorageError;
use crate::error::{Outcome, ResultCode, messages};

/// Constraints on string-shaped options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringConstraints {
    /// The empty string is rejected.
    pub not_empty: bool,
    /// A change requires the component to re-initialise.
    pub important: bool,
}

impl StringConstraints {
    pub const OPTIONAL: Self = Self {
        not_empty: false,
        important: false,
    };
    pub const REQUIRED: Self = Self {
        not_empty: true,
        important: false,
    };
    pub const IMPORTANT: Self = Self {
        not_empty: false,
        important: true,
    };
    pub const REQUIRED_IMPORTANT: Self = Self {
        not_empty: true,
        important: true,
    };
}

/// Option handlers bound to one component's namespace.
pub struct OptionHandler<'a> {
    settings: &'a Settings,
    component: &'a str,
}

fn saved(modified: bool, action: SettingsAction, important: bool, detail: String) -> Outcome {
    let code = if modified && important && action == SettingsAction::Save {
        ResultCode::OkReinit
    } else {
        ResultCode::Ok
    };
    Outcome::new(code, detail)
}

fn storage_failure(component: &str, key: &str, err: StorageError) -> Outcome {
    error!("Settings: {}.{} write failed: {}", component, key, err);
    Outcome::error(messages::STORAGE_FAILURE)
}

impl<'a> OptionHandler<'a> {
    pub fn new(settings: &'a Settings, component: &'a str) -> Self {
        Self {
            settings,
            component,
        }
    }

    fn number<T>(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        important: bool,
        current: T,
        write: impl Fn(&Settings, T) -> Result<(), StorageError>,
    ) -> Outcome
    where
        T: FromStr + PartialEq + Copy + Display,
    {
        if action == SettingsAction::Read {
            return Outcome::ok(current.to_string());
        }
        let Ok(v) = value.trim().parse::<T>() else {
            return Outcome::invalid_value();
        };
        if action == SettingsAction::Verify {
            return Outcome::ok(current.to_string());
        }
        let modified = current != v;
        if let Err(e) = write(self.settings, v) {
            return storage_failure(self.component, key, e);
        }
        saved(modified, action, important, v.to_string())
    }

    pub fn byte(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        important: bool,
        default: u8,
    ) -> Outcome {
        let current = self.settings.get_byte(self.component, key, default);
        self.number(key, value, action, important, current, |s, v| {
            s.set_byte(self.component, key, v)
        })
    }

    pub fn short(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        important: bool,
        default: u16,
    ) -> Outcome {
        let current = self.settings.get_short(self.component, key, default);
        self.number(key, value, action, important, current, |s, v| {
            s.set_short(self.component, key, v)
        })
    }

    pub fn long(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        important: bool,
        default: u32,
    ) -> Outcome {
        let current = self.settings.get_long(self.component, key, default);
        self.number(key, value, action, important, current, |s, v| {
            s.set_long(self.component, key, v)
        })
    }

    /// `true` / `false` stored as a byte.
    pub fn flag(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        important: bool,
        default: bool,
    ) -> Outcome {
        let current = self.settings.get_byte(self.component, key, u8::from(default)) != 0;
        if action == SettingsAction::Read {
            return Outcome::ok(current.to_string());
        }
        let v = match value.trim() {
            "true" => true,
            "false" => false,
            _ => return Outcome::invalid_value(),
        };
        if action == SettingsAction::Verify {
            return Outcome::ok(current.to_string());
        }
        if let Err(e) = self.settings.set_byte(self.component, key, u8::from(v)) {
            return storage_failure(self.component, key, e);
        }
        saved(current != v, action, important, v.to_string())
    }

    pub fn string(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        constraints: StringConstraints,
        default: &str,
    ) -> Outcome {
        let current = self.settings.get_string(self.component, key, default);
        if action == SettingsAction::Read {
            return Outcome::ok(current);
        }
        if (value.is_empty() && constraints.not_empty) || !Settings::fits_string(value) {
            return Outcome::invalid_value();
        }
        if action == SettingsAction::Verify {
            return Outcome::ok(current);
        }
        if let Err(e) = self.settings.set_string(self.component, key, value) {
            return storage_failure(self.component, key, e);
        }
        saved(current != value, action, constraints.important, value.to_owned())
    }

    /// Dotted-quad IPv4 address stored as a `long`.  Empty stores 0.0.0.0.
    pub fn ip(
        &self,
        key: &str,
        value: &str,
        action: SettingsAction,
        constraints: StringConstraints,
        default: Ipv4Addr,
    ) -> Outcome {
        let current = self
            .settings
            .get_long(self.component, key, u32::from(default));
        if action == SettingsAction::Read {
            return Outcome::ok(Ipv4Addr::from(current).to_string());
        }
        let value = value.trim();
        let addr = if value.is_empty() {
            if constraints.not_empty {
                return Outcome::invalid_value();
            }
            Ipv4Addr::UNSPECIFIED
        } else {
            match value.parse::<Ipv4Addr>() {
                Ok(a) => a,
                Err(_) => return Outcome::invalid_value(),
            }
        };
        if action == SettingsAction::Verify {
            return Outcome::ok(Ipv4Addr::from(current).to_string());
        }
        let raw = u32::from(addr);
        if let Err(e) = self.settings.set_long(self.component, key, raw) {
            return storage_failure(self.component, key, e);
        }
        saved(
            current != raw,
            action,
            constraints.important,
            addr.to_string(),
        )
    }

    /// Read an IPv4 option as stored by [`ip`](Self::ip).
    pub fn get_ip(&self, key: &str, default: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(
            self.settings
                .get_long(self.component, key, u32::from(default)),
        )
    }
}
