// Logging bridge
//
// Everything inside the crate logs through the `log` facade. The process-wide
// HostLogger forwards records to the host's callback once one is installed
// with set_logger, and to an env_logger instance (stderr, RUST_LOG aware)
// until then.

use std::ffi::{c_char, c_void, CString};
use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::RwLock;

/// Host log callback: `(level, NUL-terminated message, user data)`
pub type LogFn = unsafe extern "C" fn(level: i32, msg: *const c_char, user: *mut c_void);

/// Host-side level numbers
pub fn host_level(level: Level) -> i32 {
    match level {
        Level::Error => 3,
        Level::Warn => 2,
        Level::Info => 1,
        Level::Debug | Level::Trace => 0,
    }
}

#[derive(Clone, Copy)]
struct HostSink {
    callback: LogFn,
    user: *mut c_void,
}

// SAFETY: the host guarantees the callback and its user pointer stay valid and
// callable from whichever thread drives the renderer until they are replaced.
unsafe impl Send for HostSink {}
unsafe impl Sync for HostSink {}

impl HostSink {
    fn emit(&self, level: i32, message: &str) {
        let Ok(message) = CString::new(message.replace('\0', " ")) else {
            return;
        };
        unsafe { (self.callback)(level, message.as_ptr(), self.user) }
    }
}

pub struct HostLogger {
    sink: RwLock<Option<HostSink>>,
    fallback: env_logger::Logger,
    level: LevelFilter,
}

impl HostLogger {
    pub fn new(level: LevelFilter) -> Self {
        let fallback = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .build();

        Self {
            sink: RwLock::new(None),
            fallback,
            level,
        }
    }

    /// Replace (or with `None`, remove) the host callback
    pub fn set_sink(&self, callback: Option<LogFn>, user: *mut c_void) {
        *self.sink.write() = callback.map(|callback| HostSink { callback, user });
    }

    /// Send a message straight to the host callback, bypassing the facade
    pub fn emit_to_host(&self, level: Level, message: &str) {
        if let Some(sink) = *self.sink.read() {
            sink.emit(host_level(level), message);
        }
    }

    fn max_level(&self) -> LevelFilter {
        self.level.max(self.fallback.filter())
    }
}

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if self.sink.read().is_some() {
            metadata.level() <= self.level
        } else {
            self.fallback.enabled(metadata)
        }
    }

    fn log(&self, record: &Record) {
        let sink = *self.sink.read();
        match sink {
            Some(sink) => {
                if record.level() <= self.level {
                    sink.emit(host_level(record.level()), &record.args().to_string());
                }
            }
            None => self.fallback.log(record),
        }
    }

    fn flush(&self) {
        self.fallback.flush();
    }
}

static LOGGER: OnceLock<HostLogger> = OnceLock::new();

/// Install the process-wide logger. Later calls return the same instance; if
/// another `log` implementation was registered first it stays in charge and
/// only direct host emits reach the callback.
pub fn install(level: LevelFilter) -> &'static HostLogger {
    let logger = LOGGER.get_or_init(|| HostLogger::new(level));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.max_level());
    }
    logger
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    static SEEN: Mutex<Vec<(i32, String, usize)>> = parking_lot::const_mutex(Vec::new());

    unsafe extern "C" fn record(level: i32, msg: *const c_char, user: *mut c_void) {
        let text = std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned();
        SEEN.lock().push((level, text, user as usize));
    }

    #[test]
    fn levels_map_to_host_numbers() {
        assert_eq!(host_level(Level::Error), 3);
        assert_eq!(host_level(Level::Warn), 2);
        assert_eq!(host_level(Level::Info), 1);
        assert_eq!(host_level(Level::Trace), 0);
    }

    #[test]
    fn sink_receives_records_at_or_above_level() {
        let logger = HostLogger::new(LevelFilter::Info);
        logger.set_sink(Some(record), 0x5eed as *mut c_void);

        logger.log(
            &Record::builder()
                .args(format_args!("swapchain recreated"))
                .level(Level::Warn)
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("too chatty"))
                .level(Level::Debug)
                .build(),
        );

        let seen = SEEN.lock();
        assert!(seen.contains(&(2, "swapchain recreated".to_string(), 0x5eed)));
        assert!(!seen.iter().any(|(_, text, _)| text == "too chatty"));
    }
}
