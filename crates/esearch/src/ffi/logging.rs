//! `log` backend that forwards records to a host callback

use std::sync::{Arc, OnceLock, RwLock};

use log::{Level, Log, Metadata, Record, SetLoggerError};

use super::types::{FfiLogLevel, LogCallback};

static FFI_LOGGER: OnceLock<FfiLogger> = OnceLock::new();

struct FfiLogger {
    callback: RwLock<Option<Arc<dyn LogCallback>>>,
    max_level: RwLock<Level>,
}

impl FfiLogger {
    fn new(max_level: Level) -> Self {
        Self {
            callback: RwLock::new(None),
            max_level: RwLock::new(max_level),
        }
    }

    fn set_callback(&self, callback: Option<Arc<dyn LogCallback>>) {
        if let Ok(mut guard) = self.callback.write() {
            *guard = callback;
        }
    }

    fn set_max_level(&self, level: Level) {
        if let Ok(mut guard) = self.max_level.write() {
            *guard = level;
        }
    }

    fn max_level(&self) -> Level {
        self.max_level.read().map(|l| *l).unwrap_or(Level::Info)
    }
}

impl Log for FfiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
            && self
                .callback
                .read()
                .ok()
                .is_some_and(|cb| cb.is_some())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Ok(guard) = self.callback.read() {
            if let Some(callback) = guard.as_ref() {
                callback.on_log(
                    FfiLogLevel::from(record.level()),
                    record.target().to_string(),
                    record.args().to_string(),
                );
            }
        }
    }

    fn flush(&self) {}
}

/// Install the FFI logger as the global logger
///
/// Records are dropped until a callback is set. Fails if another logger was
/// installed first.
pub fn init_ffi_logger(max_level: Level) -> Result<(), SetLoggerError> {
    let logger = FFI_LOGGER.get_or_init(|| FfiLogger::new(max_level));
    log::set_logger(logger)?;
    log::set_max_level(max_level.to_level_filter());
    Ok(())
}

/// Replace the callback. `None` silences logging.
pub fn set_log_callback(callback: Option<Arc<dyn LogCallback>>) {
    if let Some(logger) = FFI_LOGGER.get() {
        logger.set_callback(callback);
    }
}

pub fn set_log_level(level: Level) {
    if let Some(logger) = FFI_LOGGER.get() {
        logger.set_max_level(level);
        log::set_max_level(level.to_level_filter());
    }
}

/// Route Rust logs to `callback` at `max_level` and below
///
/// Safe to call again: later calls swap the callback and level.
#[uniffi::export]
pub fn initialize_logging(callback: Box<dyn LogCallback>, max_level: FfiLogLevel) {
    let level = Level::from(max_level);
    if init_ffi_logger(level).is_err() {
        set_log_level(level);
    }
    set_log_callback(Some(Arc::from(callback)));
}
