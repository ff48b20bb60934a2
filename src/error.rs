//! Outcome types for the settings and command protocol.
//!
//! Every option handler, command and upload step reports a [`ResultCode`]
//! together with a human-readable detail.  Codes carry a severity so that a
//! batch of results can be folded into one aggregate:
//!
//! ```text
//!   Unchanged < { Error, UnknownCommand, UnknownOption, InvalidValue } < Ok < OkReinit < OkRestart
//! ```
//!
//! Error kinds share one severity level.  They are never folded; the first
//! one observed aborts whatever batch produced it.

use core::fmt;

// ---------------------------------------------------------------------------
// Canonical messages
// ---------------------------------------------------------------------------

pub mod messages {
    pub const OK: &str = "Ok";
    pub const UNKNOWN_COMMAND: &str = "Unknown command";
    pub const UNKNOWN_OPTION: &str = "Unknown option";
    pub const INVALID_VALUE: &str = "Invalid value";
    pub const SETTINGS_APPLIED: &str = "Settings are applied";
    pub const SETTINGS_INVALID_VALUE: &str = ": invalid value";
    pub const UPLOAD_STARTED: &str = "Upload started";
    pub const UPLOAD_COMPLETE: &str = "Upload complete";
    pub const UPLOAD_FIRMWARE_DONE: &str = "Firmware upload done";
    pub const UPLOAD_IN_PROGRESS: &str = "Upload in progress";
    pub const UPLOAD_INVALID_SIZE: &str = "Invalid upload size";
    pub const STORAGE_FAILURE: &str = "Storage failure";
}

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// Outcome classification of a protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Nothing happened; not an error.
    Unchanged,
    /// Generic failure (storage, upload, malformed import).
    Error,
    /// The verb is not handled by the addressed component.
    UnknownCommand,
    /// The option key is not known to the addressed component.
    UnknownOption,
    /// The value failed validation.  State is never mutated.
    InvalidValue,
    /// Applied.
    Ok,
    /// Applied; the component must re-initialise to pick it up.
    OkReinit,
    /// Applied; the device must restart to pick it up.
    OkRestart,
}

impl ResultCode {
    /// Severity rank: 0 = unchanged, 1 = any error, 2..=4 = success tiers.
    pub const fn severity(self) -> u8 {
        match self {
            Self::Unchanged => 0,
            Self::Error | Self::UnknownCommand | Self::UnknownOption | Self::InvalidValue => 1,
            Self::Ok => 2,
            Self::OkReinit => 3,
            Self::OkRestart => 4,
        }
    }

    pub const fn is_error(self) -> bool {
        self.severity() == 1
    }

    /// `Ok`, `OkReinit` or `OkRestart`.
    pub const fn is_success(self) -> bool {
        self.severity() >= 2
    }

    /// The more severe of `self` and `other`; ties keep `self`.
    pub const fn escalate(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Error => write!(f, "error"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::UnknownOption => write!(f, "unknown option"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::Ok => write!(f, "ok"),
            Self::OkReinit => write!(f, "ok (reinit)"),
            Self::OkRestart => write!(f, "ok (restart)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome = code + detail
// ---------------------------------------------------------------------------

/// A [`ResultCode`] with the text reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub code: ResultCode,
    pub detail: String,
}

impl Outcome {
    pub fn new(code: ResultCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn ok(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::Ok, detail)
    }

    pub fn unchanged() -> Self {
        Self::new(ResultCode::Unchanged, "")
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::Error, detail)
    }

    pub fn unknown_command() -> Self {
        Self::new(ResultCode::UnknownCommand, messages::UNKNOWN_COMMAND)
    }

    pub fn unknown_option() -> Self {
        Self::new(ResultCode::UnknownOption, messages::UNKNOWN_OPTION)
    }

    pub fn invalid_value() -> Self {
        Self::new(ResultCode::InvalidValue, messages::INVALID_VALUE)
    }

    pub fn is_error(&self) -> bool {
        self.code.is_error()
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.detail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_lattice_order() {
        assert!(ResultCode::Unchanged.severity() < ResultCode::InvalidValue.severity());
        assert!(ResultCode::InvalidValue.severity() < ResultCode::Ok.severity());
        assert!(ResultCode::Ok.severity() < ResultCode::OkReinit.severity());
        assert!(ResultCode::OkReinit.severity() < ResultCode::OkRestart.severity());
    }

    #[test]
    fn unknown_kinds_are_distinct_with_equal_severity() {
        assert_ne!(ResultCode::UnknownCommand, ResultCode::UnknownOption);
        assert_eq!(
            ResultCode::UnknownCommand.severity(),
            ResultCode::UnknownOption.severity()
        );
    }

    #[test]
    fn escalate_keeps_highest() {
        let rc = ResultCode::Ok
            .escalate(ResultCode::OkRestart)
            .escalate(ResultCode::OkReinit);
        assert_eq!(rc, ResultCode::OkRestart);
        assert_eq!(ResultCode::Unchanged.escalate(ResultCode::Ok), ResultCode::Ok);
    }

    #[test]
    fn error_and_success_classification() {
        assert!(ResultCode::InvalidValue.is_error());
        assert!(!ResultCode::Unchanged.is_error());
        assert!(!ResultCode::Unchanged.is_success());
        assert!(ResultCode::OkReinit.is_success());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::ok("42").to_string(), "ok: 42");
        assert_eq!(Outcome::unchanged().to_string(), "unchanged");
        assert_eq!(
            Outcome::invalid_value().to_string(),
            "invalid value: Invalid value"
        );
    }
}
