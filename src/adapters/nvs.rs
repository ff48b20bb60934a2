//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] for the settings store.
//!
//! - **`target_os = "espidf"`**: raw `nvs_*` calls from `esp-idf-sys`, one
//!   open/commit/close cycle per operation so a reset never leaves a write
//!   half-applied.
//! - **all other targets**: an in-memory map keyed `"<namespace>::<key>"`.

use log::info;

use crate::app::ports::{StorageError, StoragePort, StorageStats};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

/// NVS names are at most 15 bytes plus the terminating NUL.
#[cfg(target_os = "espidf")]
fn c_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = name.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// Entries of a 24 KiB partition: five usable pages of 126 entries.
#[cfg(not(target_os = "espidf"))]
const SIM_CAPACITY_ENTRIES: usize = 5 * 126;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, Vec<u8>>,
}

impl NvsAdapter {
    /// Initialise NVS flash.  On first boot or after a layout version change
    /// the partition is erased and initialised again.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NVS: flash initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NVS: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: HashMap::new(),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Open `namespace`, run `f` on the handle, close.
    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        write: bool,
        f: impl FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    ) -> Result<T, esp_err_t> {
        let ns = c_name(namespace);
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };
        let mut handle: nvs_handle_t = 0;
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        unsafe { nvs_close(handle) };
        result
    }

    #[cfg(target_os = "espidf")]
    fn commit(handle: nvs_handle_t) -> Result<(), esp_err_t> {
        match unsafe { nvs_commit(handle) } {
            ESP_OK => Ok(()),
            err => Err(err),
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let data = self
                .store
                .get(&Self::composite_key(namespace, key))
                .ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            let result = Self::with_handle(namespace, false, |handle| {
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret == ESP_OK { Ok(size) } else { Err(ret) }
            });
            match result {
                Ok(size) => Ok(size),
                Err(ESP_ERR_NVS_NOT_FOUND) => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            Self::with_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                match ret {
                    ESP_OK => Self::commit(handle),
                    err => Err(err),
                }
            })
            .map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            Self::with_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                Self::commit(handle)
            })
            .map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .contains_key(&Self::composite_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_name(key);
            Self::with_handle(namespace, false, |handle| {
                let ret =
                    unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == ESP_OK)
            })
            .unwrap_or(false)
        }
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let prefix = Self::composite_key(namespace, "");
            self.store.retain(|k, _| !k.starts_with(&prefix));
            info!("NVS: namespace '{}' erased", namespace);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::with_handle(namespace, true, |handle| {
                match unsafe { nvs_erase_all(handle) } {
                    ESP_OK => Self::commit(handle),
                    err => Err(err),
                }
            })
            .map_err(|_| StorageError::IoError)?;
            info!("NVS: namespace '{}' erased", namespace);
            Ok(())
        }
    }

    fn stats(&self) -> Option<StorageStats> {
        #[cfg(not(target_os = "espidf"))]
        {
            let used = self.store.len();
            Some(StorageStats {
                used,
                free: SIM_CAPACITY_ENTRIES.saturating_sub(used),
            })
        }

        #[cfg(target_os = "espidf")]
        {
            // SAFETY: zeroed is a valid empty record; the call fills it.
            let mut stats: nvs_stats_t = unsafe { core::mem::zeroed() };
            if unsafe { nvs_get_stats(core::ptr::null(), &mut stats) } != ESP_OK {
                return None;
            }
            Some(StorageStats {
                used: stats.used_entries,
                free: stats.free_entries,
            })
        }
    }
}
