//! Bulk data upload: firmware images and configuration archives.
//!
//! Flow: `begin(action, size)` → N × `block(data)` → `end(success)` → restart
//!
//! The core component owns at most one [`UploadHandler`] at a time and
//! drops it once `end` has been called, whatever the outcome.

use core::fmt;

use log::{info, warn};
use serde_json::Value;

use crate::component::{ComponentId, Request, RequestQueue};
use crate::error::messages;

const MAX_FIRMWARE_SIZE: usize = 4 * 1024 * 1024;
const MAX_CONFIG_SIZE: usize = 16 * 1024;

/// Upload kinds accepted by `begin`.
pub const ACTION_FIRMWARE: &str = "firmware";
pub const ACTION_CONFIG: &str = "config";

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    UnknownAction,
    InvalidSize,
    BeginFailed,
    WriteFailed,
    Overflow,
    IncompleteTransfer,
    VerifyFailed,
    BootSetFailed,
    Aborted,
    InvalidJson,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction => write!(f, "{}", messages::UNKNOWN_COMMAND),
            Self::InvalidSize => write!(f, "{}", messages::UPLOAD_INVALID_SIZE),
            Self::BeginFailed => write!(f, "no inactive firmware partition available"),
            Self::WriteFailed => write!(f, "firmware write failed"),
            Self::Overflow => write!(f, "data exceeds declared upload size"),
            Self::IncompleteTransfer => write!(f, "upload ended before all bytes arrived"),
            Self::VerifyFailed => write!(f, "firmware image verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
            Self::Aborted => write!(f, "upload aborted"),
            Self::InvalidJson => write!(f, "configuration is not a JSON object"),
        }
    }
}

/// One upload in progress.
pub trait UploadHandler {
    fn block(&mut self, data: &[u8]) -> Result<(), UploadError>;

    /// Complete or abort.  The detail on success is reported to the client.
    fn end(&mut self, success: bool) -> Result<&'static str, UploadError>;
}

/// Start a handler for `action`.
pub fn begin(
    action: &str,
    size: usize,
    requests: &RequestQueue,
) -> Result<Box<dyn UploadHandler>, UploadError> {
    match action {
        ACTION_FIRMWARE => Ok(Box::new(FirmwareUploader::begin(size)?)),
        ACTION_CONFIG => Ok(Box::new(ConfigImporter::begin(size, requests.clone())?)),
        _ => Err(UploadError::UnknownAction),
    }
}

// ── Firmware ──────────────────────────────────────────────────

/// Streams a firmware image into the inactive OTA partition.
///
/// On ESP-IDF targets, uses the `esp-ota` crate.  On simulation targets,
/// only the byte accounting runs.
pub struct FirmwareUploader {
    expected_size: usize,
    bytes_written: usize,
    #[cfg(target_os = "espidf")]
    update: Option<esp_ota::OtaUpdate>,
}

impl FirmwareUploader {
    pub fn begin(size: usize) -> Result<Self, UploadError> {
        if size == 0 || size > MAX_FIRMWARE_SIZE {
            return Err(UploadError::InvalidSize);
        }

        #[cfg(target_os = "espidf")]
        let update = Some(esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("Upload: esp-ota begin failed: {:?}", e);
            UploadError::BeginFailed
        })?);

        info!("Upload: firmware begin ({} bytes)", size);
        Ok(Self {
            expected_size: size,
            bytes_written: 0,
            #[cfg(target_os = "espidf")]
            update,
        })
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    #[cfg(target_os = "espidf")]
    fn write(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let Some(update) = self.update.as_mut() else {
            return Err(UploadError::Aborted);
        };
        update.write(data).map_err(|e| {
            warn!("Upload: esp-ota write failed: {:?}", e);
            UploadError::WriteFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn write(&mut self, _data: &[u8]) -> Result<(), UploadError> {
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn finish(&mut self) -> Result<(), UploadError> {
        let Some(update) = self.update.take() else {
            return Err(UploadError::Aborted);
        };
        let mut completed = update.finalize().map_err(|e| {
            warn!("Upload: esp-ota finalize failed: {:?}", e);
            UploadError::VerifyFailed
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("Upload: esp-ota set_as_boot_partition failed: {:?}", e);
            UploadError::BootSetFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn finish(&mut self) -> Result<(), UploadError> {
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn abort(&mut self) {
        if let Some(update) = self.update.take() {
            if let Err(e) = update.abort() {
                warn!("Upload: esp-ota abort failed: {:?}", e);
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn abort(&mut self) {}
}

impl UploadHandler for FirmwareUploader {
    fn block(&mut self, data: &[u8]) -> Result<(), UploadError> {
        if self.bytes_written + data.len() > self.expected_size {
            self.abort();
            return Err(UploadError::Overflow);
        }
        if let Err(e) = self.write(data) {
            self.abort();
            return Err(e);
        }
        self.bytes_written += data.len();
        Ok(())
    }

    fn end(&mut self, success: bool) -> Result<&'static str, UploadError> {
        if !success {
            self.abort();
            return Err(UploadError::Aborted);
        }
        if self.bytes_written != self.expected_size {
            self.abort();
            return Err(UploadError::IncompleteTransfer);
        }
        self.finish()?;
        info!("Upload: firmware complete, {} bytes", self.bytes_written);
        Ok(messages::UPLOAD_FIRMWARE_DONE)
    }
}

// ── Configuration ─────────────────────────────────────────────

/// Buffers a `{ "<id>": { <options> }, ... }` document and, on success,
/// queues one import per component id.
pub struct ConfigImporter {
    buffer: Vec<u8>,
    expected_size: usize,
    requests: RequestQueue,
}

impl ConfigImporter {
    pub fn begin(size: usize, requests: RequestQueue) -> Result<Self, UploadError> {
        if size == 0 || size > MAX_CONFIG_SIZE {
            return Err(UploadError::InvalidSize);
        }
        Ok(Self {
            buffer: Vec::with_capacity(size),
            expected_size: size,
            requests,
        })
    }
}

impl UploadHandler for ConfigImporter {
    fn block(&mut self, data: &[u8]) -> Result<(), UploadError> {
        if self.buffer.len() + data.len() > self.expected_size {
            return Err(UploadError::Overflow);
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self, success: bool) -> Result<&'static str, UploadError> {
        if !success {
            return Err(UploadError::Aborted);
        }
        let Ok(Value::Object(sections)) = serde_json::from_slice::<Value>(&self.buffer) else {
            warn!("Upload: configuration archive is not a JSON object");
            return Err(UploadError::InvalidJson);
        };
        for (id, options) in sections {
            let Some(target) = ComponentId::new(&id) else {
                warn!("Upload: skipping section '{}'", id);
                continue;
            };
            self.requests.push(Request::Import {
                target,
                data: options.to_string(),
            });
        }
        Ok(messages::UPLOAD_COMPLETE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_and_zero_size_rejected() {
        let q = RequestQueue::new();
        assert_eq!(begin("fs_image", 10, &q).err(), Some(UploadError::UnknownAction));
        assert_eq!(begin(ACTION_FIRMWARE, 0, &q).err(), Some(UploadError::InvalidSize));
        assert_eq!(begin(ACTION_CONFIG, 0, &q).err(), Some(UploadError::InvalidSize));
    }

    #[test]
    fn firmware_counts_bytes() {
        let mut fw = FirmwareUploader::begin(6).unwrap();
        fw.block(b"abc").unwrap();
        assert_eq!(fw.end(true), Err(UploadError::IncompleteTransfer));

        let mut fw = FirmwareUploader::begin(6).unwrap();
        fw.block(b"abc").unwrap();
        fw.block(b"def").unwrap();
        assert_eq!(fw.bytes_written(), 6);
        assert_eq!(fw.end(true), Ok(messages::UPLOAD_FIRMWARE_DONE));
    }

    #[test]
    fn firmware_overflow_and_abort() {
        let mut fw = FirmwareUploader::begin(2).unwrap();
        assert_eq!(fw.block(b"abc"), Err(UploadError::Overflow));
        let mut fw = FirmwareUploader::begin(2).unwrap();
        assert_eq!(fw.end(false), Err(UploadError::Aborted));
    }

    #[test]
    fn config_queues_one_import_per_section() {
        let q = RequestQueue::new();
        let doc = br#"{"wifi":{"ssid1":"home"},"mqtt":{"port":1884}}"#;
        let mut imp = begin(ACTION_CONFIG, doc.len(), &q).unwrap();
        imp.block(&doc[..10]).unwrap();
        imp.block(&doc[10..]).unwrap();
        assert_eq!(imp.end(true), Ok(messages::UPLOAD_COMPLETE));

        assert_eq!(
            q.pop(),
            Some(Request::Import {
                target: ComponentId::from_static("mqtt"),
                data: r#"{"port":1884}"#.into(),
            })
        );
        assert_eq!(
            q.pop(),
            Some(Request::Import {
                target: ComponentId::from_static("wifi"),
                data: r#"{"ssid1":"home"}"#.into(),
            })
        );
        assert!(q.is_empty());
    }

    #[test]
    fn config_rejects_bad_json() {
        let q = RequestQueue::new();
        let mut imp = ConfigImporter::begin(4, q.clone()).unwrap();
        imp.block(b"[1]").unwrap();
        assert_eq!(imp.end(true), Err(UploadError::InvalidJson));
        assert!(q.is_empty());
    }
}
