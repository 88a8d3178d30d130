//! Rolling text log for load errors and engine diagnostics

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Default log file location (in the user's home directory)
fn default_log_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".chipbeat").join("chipbeat.log")
}

fn current_log_path() -> PathBuf {
    LOG_FILE
        .lock()
        .ok()
        .and_then(|p| p.clone())
        .unwrap_or_else(default_log_path)
}

/// Initialize logging: installs env_logger for stderr output (idempotent)
/// and prepares the append-only log file.
pub fn init() {
    let _ = env_logger::Builder::from_default_env().try_init();

    let log_path = current_log_path();
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut path) = LOG_FILE.lock() {
        if path.is_none() {
            *path = Some(log_path);
        }
    }

    append("Engine started");
}

/// Redirect the file log, mainly for tests and embedded hosts
pub fn set_log_path(path: PathBuf) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut current) = LOG_FILE.lock() {
        *current = Some(path);
    }
}

/// Append one timestamped line to the log file
pub fn append(message: &str) {
    let log_path = current_log_path();
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(file, "[{}] {}", timestamp, message);
    }
}

/// Get the log file path as a string
pub fn log_file_path() -> String {
    current_log_path().to_string_lossy().to_string()
}

/// Read the full log file contents
pub fn read_log_file() -> Result<String, String> {
    let log_path = current_log_path();
    if !log_path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(&log_path).map_err(|e| format!("Failed to read log file: {}", e))
}

/// Truncate the log file
pub fn clear_log_file() -> Result<(), String> {
    let log_path = current_log_path();
    if log_path.exists() {
        fs::write(&log_path, "").map_err(|e| format!("Failed to clear log file: {}", e))?;
    }
    Ok(())
}
