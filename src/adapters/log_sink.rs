//! Ring-buffer logger.
//!
//! Implements [`log::Log`] by keeping the most recent formatted lines in a
//! shared [`LogRing`] and forwarding every record to the console backend
//! (`EspLogger`, UART / USB-CDC) on the device.  The `log` component reads
//! the ring back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{LevelFilter, Log, Metadata, Record};

#[derive(Default)]
struct RingInner {
    lines: VecDeque<String>,
    /// Total lines ever pushed.
    sequence: u64,
}

/// Bounded, shareable buffer of recent log lines.
#[derive(Clone)]
pub struct LogRing {
    inner: Arc<Mutex<RingInner>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line.into());
        inner.sequence += 1;
    }

    /// Buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Changes whenever a line is pushed.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().map(|inner| inner.sequence).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The process logger.
pub struct RingLogger {
    ring: LogRing,
    #[cfg(target_os = "espidf")]
    console: esp_idf_svc::log::EspLogger,
}

impl RingLogger {
    pub fn new(ring: LogRing) -> Self {
        Self {
            ring,
            #[cfg(target_os = "espidf")]
            console: esp_idf_svc::log::EspLogger::new(),
        }
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.ring
            .push(format!("{:<5} {}", record.level(), record.args()));
        #[cfg(target_os = "espidf")]
        self.console.log(record);
    }

    fn flush(&self) {
        #[cfg(target_os = "espidf")]
        self.console.flush();
    }
}

/// Install a [`RingLogger`] over `ring` as the global logger.
pub fn install(ring: LogRing, level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let logger: &'static RingLogger = Box::leak(Box::new(RingLogger::new(ring)));
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}
