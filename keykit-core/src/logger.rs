//! Bridge from the `log` facade to a host supplied logger.
//!
//! The library only ever calls `log::debug!`, `log::info!` and friends. A host
//! that wants those records implements [`Logger`] and registers it once with
//! [`set_logger`]:
//!
//! ```rust
//! use std::sync::Arc;
//! use keykit_core::logger::{set_logger, LogLevel, Logger};
//!
//! struct Stderr;
//!
//! impl Logger for Stderr {
//!     fn log(&self, level: LogLevel, message: String) {
//!         eprintln!("[{level:?}] {message}");
//!     }
//! }
//!
//! set_logger(Arc::new(Stderr));
//! ```
//!
//! Records never carry secret material: paths, counts and public keys only.

use std::sync::{Arc, OnceLock};

/// Receiver of forwarded log records.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Records `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging information.
    Debug,
    /// Progress of normal operations (logins, logouts, expiry).
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

struct ForeignLogger;

/// Debug and trace records are only forwarded from this crate's modules so
/// dependencies do not flood the host.
fn should_forward(level: log::Level, module_path: Option<&str>) -> bool {
    let verbose = matches!(level, log::Level::Debug | log::Level::Trace);
    !verbose || module_path.is_some_and(|module| module.starts_with("keykit"))
}

impl log::Log for ForeignLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.level(), record.module_path()) {
            return;
        }
        if let Some(logger) = LOGGER_INSTANCE.get() {
            logger.log(record.level().into(), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Registers the host logger and installs the bridge as the `log` backend.
///
/// Only the first registration takes effect; later calls are ignored with a
/// warning on stderr.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>) {
    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("keykit logger already set");
        return;
    }
    if let Err(err) = init_logger() {
        eprintln!("failed to install keykit logger: {err}");
    }
}

fn init_logger() -> Result<(), log::SetLoggerError> {
    static LOGGER: ForeignLogger = ForeignLogger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for Capture {
        fn log(&self, level: LogLevel, message: String) {
            self.0.lock().unwrap().push((level, message));
        }
    }

    #[test]
    fn test_should_forward() {
        assert!(should_forward(log::Level::Info, Some("hyper::client")));
        assert!(should_forward(log::Level::Debug, Some("keykit_core::keystore")));
        assert!(!should_forward(log::Level::Debug, Some("hyper::client")));
        assert!(!should_forward(log::Level::Trace, None));
    }

    #[test]
    fn test_forwards_records() {
        let capture = Arc::new(Capture::default());
        set_logger(capture.clone());

        log::info!("hello {}", "host");
        log::debug!("crate debug");

        let records = capture.0.lock().unwrap();
        assert!(records.contains(&(LogLevel::Info, "hello host".to_string())));
        assert!(records.contains(&(LogLevel::Debug, "crate debug".to_string())));
    }
}
