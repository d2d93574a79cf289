//! Session logger: routes the `log` facade into a single file in the OS data
//! directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\drawpad\drawpad.log`
//!   Linux:    `~/.local/share/drawpad/drawpad.log`
//!   macOS:    `~/Library/Application Support/drawpad/drawpad.log`
//!
//! Library code only ever calls `log::info!` and friends; the binary decides
//! whether this backend is installed.  Panics are mirrored into the file via
//! a panic hook.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use log::{LevelFilter, Log, Metadata, Record};

static LOG_FILE: OnceLock<Mutex<File>> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOGGER: SessionLogger = SessionLogger;

struct SessionLogger;

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        write_line(&format!(
            "[{}] [{}] {}: {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {
        if let Some(mutex) = LOG_FILE.get()
            && let Ok(mut file) = mutex.lock()
        {
            let _ = file.flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Write a raw line to the session log.  Silently ignores I/O errors so that
/// logging never crashes the application.
pub fn write_line(line: &str) {
    if let Some(mutex) = LOG_FILE.get()
        && let Ok(mut file) = mutex.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

/// Initialise the session logger at the default location.
pub fn init(level: LevelFilter) -> io::Result<PathBuf> {
    init_at(&log_file_path(), level)
}

/// Initialise the session logger writing to `path`.
///
/// * Creates (or truncates) the log file.
/// * Installs this module as the global `log` backend at `level`.
/// * Installs a panic hook that writes the panic message to the log before
///   running the previous handler.
///
/// Only the first call in a process takes effect; later calls return the
/// already-open path.
pub fn init_at(path: &Path, level: LevelFilter) -> io::Result<PathBuf> {
    if let Some(existing) = LOG_PATH.get() {
        return Ok(existing.clone());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Open file, truncating any previous session's content
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    let _ = LOG_PATH.set(path.to_path_buf());
    let _ = LOG_FILE.set(Mutex::new(file));

    write_line(&format!(
        "=== drawpad session started {} ===",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    write_line(&format!("Log file: {}", path.display()));
    write_line("");

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
        prev(info);
    }));

    Ok(path.to_path_buf())
}

fn log_file_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drawpad")
        .join("drawpad.log")
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reach_the_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.log");
        let opened = init_at(&path, LevelFilter::Debug).unwrap();

        log::info!(target: "drawpad::test", "hello from the logger test");
        log::logger().flush();

        let text = fs::read_to_string(&opened).unwrap();
        assert!(text.contains("=== drawpad session started"));
        assert!(text.contains("[INFO] drawpad::test: hello from the logger test"));
    }
}
