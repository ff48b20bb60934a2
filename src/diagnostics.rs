//! CPU load estimate and runtime metrics.
//!
//! The scheduler feeds every loop iteration's active and idle time into a
//! [`LoadMeter`]; the smoothed percentage is published through
//! [`SystemState`](crate::state::SystemState) and reported by the core
//! component together with a [`RuntimeMetrics`] snapshot.

use serde::Serialize;

/// Smoothing shift: each sample moves the average by 1/8 of the difference.
const LOAD_SMOOTHING_SHIFT: u32 = 3;

/// Exponentially smoothed busy percentage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadMeter {
    /// Average in percent, fixed point ×256.
    avg_x256: u32,
    samples: u32,
}

impl LoadMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one iteration and return the updated estimate.
    pub fn record(&mut self, active_us: u64, idle_us: u64) -> u8 {
        let total = active_us.saturating_add(idle_us);
        let sample = if total == 0 {
            0
        } else {
            (active_us.saturating_mul(100) / total).min(100) as u32
        };
        let sample_x256 = sample << 8;
        if self.samples == 0 {
            self.avg_x256 = sample_x256;
        } else if sample_x256 >= self.avg_x256 {
            self.avg_x256 += (sample_x256 - self.avg_x256) >> LOAD_SMOOTHING_SHIFT;
        } else {
            self.avg_x256 -= (self.avg_x256 - sample_x256) >> LOAD_SMOOTHING_SHIFT;
        }
        self.samples = self.samples.saturating_add(1);
        self.load()
    }

    /// Current estimate, percent.
    pub fn load(&self) -> u8 {
        ((self.avg_x256 + 128) >> 8).min(100) as u8
    }
}

/// Runtime diagnostics snapshot collected on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeMetrics {
    pub uptime: u64,
    pub load_avg: u8,
    pub heap_free: u32,
    pub heap_min_free: u32,
}

impl RuntimeMetrics {
    #[cfg(target_os = "espidf")]
    pub fn collect(uptime_secs: u64, load_avg: u8) -> Self {
        // SAFETY: plain reads of allocator counters.
        let heap_free = unsafe { esp_idf_sys::esp_get_free_heap_size() };
        let heap_min_free = unsafe { esp_idf_sys::esp_get_minimum_free_heap_size() };
        Self {
            uptime: uptime_secs,
            load_avg,
            heap_free,
            heap_min_free,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(uptime_secs: u64, load_avg: u8) -> Self {
        // Synthetic heap that decays slowly, so simulation exercises the
        // same reporting paths as hardware.
        let base_free: u32 = 307_200;
        let decay = (uptime_secs / 60) as u32 * 512;
        let heap_free = base_free.saturating_sub(decay);
        Self {
            uptime: uptime_secs,
            load_avg,
            heap_free,
            heap_min_free: heap_free - heap_free / 8,
        }
    }
}

/// Allocator counters, bytes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HeapStats {
    #[serde(rename = "HeapSize")]
    pub size: u32,
    #[serde(rename = "Free")]
    pub free: u32,
    #[serde(rename = "Lowest")]
    pub lowest: u32,
    #[serde(rename = "MaxBlock")]
    pub max_block: u32,
}

impl HeapStats {
    #[cfg(target_os = "espidf")]
    pub fn collect(_uptime_secs: u64) -> Self {
        use esp_idf_sys::{
            MALLOC_CAP_DEFAULT, esp_get_free_heap_size, esp_get_minimum_free_heap_size,
            heap_caps_get_largest_free_block, heap_caps_get_total_size,
        };
        // SAFETY: plain reads of allocator counters.
        unsafe {
            Self {
                size: heap_caps_get_total_size(MALLOC_CAP_DEFAULT) as u32,
                free: esp_get_free_heap_size(),
                lowest: esp_get_minimum_free_heap_size(),
                max_block: heap_caps_get_largest_free_block(MALLOC_CAP_DEFAULT) as u32,
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn collect(uptime_secs: u64) -> Self {
        let metrics = RuntimeMetrics::collect(uptime_secs, 0);
        Self {
            size: 327_680,
            free: metrics.heap_free,
            lowest: metrics.heap_min_free,
            max_block: metrics.heap_free / 2,
        }
    }
}

/// Why the chip last came out of reset.
#[cfg(target_os = "espidf")]
#[allow(non_upper_case_globals)]
pub fn reset_reason() -> &'static str {
    use esp_idf_sys::*;
    // SAFETY: reads a value latched at boot.
    match unsafe { esp_reset_reason() } {
        esp_reset_reason_t_ESP_RST_POWERON => "Power on",
        esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_reset_reason_t_ESP_RST_SW => "Software restart",
        esp_reset_reason_t_ESP_RST_PANIC => "Exception/panic",
        esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep exit",
        esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_reset_reason_t_ESP_RST_SDIO => "SDIO reset",
        _ => "Unknown",
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn reset_reason() -> &'static str {
    "Power on"
}

/// Install a panic hook that logs the reason before the default handler
/// resets the device.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        match info.location() {
            Some(loc) => log::error!("PANIC at {}:{}: {}", loc.file(), loc.line(), reason),
            None => log::error!("PANIC: {}", reason),
        }
    }));
}
