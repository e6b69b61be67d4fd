// src/logging.rs
//
// Timestamped logging for a headless gateway process. No tracing subscriber,
// no log crate — just stderr with a local-time prefix, matching the teacher's
// own preference for a small macro over a full logging framework.

use std::sync::Mutex;

/// Global log file handle. When `Some`, `glog!` writes to both stderr and this file.
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Initialise file logging alongside stderr. Appends to the given path,
/// creating it if necessary. Failures to open the file are logged to
/// stderr and file logging is left disabled — this is a convenience, not
/// something worth treating as a fatal error.
pub fn init_file_logging(path: &std::path::Path) {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            if let Ok(mut guard) = LOG_FILE.lock() {
                *guard = Some(file);
            }
            eprintln!(
                "{} [logging] file logging started: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                path.display()
            );
        }
        Err(e) => {
            eprintln!(
                "{} [logging] unable to open log file {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                path.display(),
                e
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
#[macro_export]
macro_rules! glog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

pub(crate) use glog;
