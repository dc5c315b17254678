//! File logging, log rotation and crash logs

use std::fs;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_FILE: &str = "tunnelctl-service.log";
const CRASH_FILE: &str = "crash.log";
/// Rotate the log once it grows past 1 MiB
const MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Rename `log_path` to `<name>.old` when it is larger than [`MAX_LOG_SIZE`]
pub fn rotate_log_if_needed(log_path: &Path) -> io::Result<bool> {
    if !log_path.exists() {
        return Ok(false);
    }

    let metadata = fs::metadata(log_path)?;
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(false);
    }

    let old_path = log_path.with_extension("log.old");
    if old_path.exists() {
        let _ = fs::remove_file(&old_path);
    }
    fs::rename(log_path, &old_path)?;
    Ok(true)
}

/// Initialise `env_logger` writing to `<log_dir>/tunnelctl-service.log`,
/// falling back to stderr. `RUST_LOG` wins over `level` when set.
pub fn init(log_dir: &Path, level: &str) -> PathBuf {
    let _ = fs::create_dir_all(log_dir);
    let log_file_path = log_dir.join(LOG_FILE);
    let rotated = rotate_log_if_needed(&log_file_path).unwrap_or(false);

    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(log::LevelFilter::from_str(level).unwrap_or(log::LevelFilter::Info));
        builder
    };
    builder.format_timestamp_millis();

    match fs::OpenOptions::new().create(true).append(true).open(&log_file_path) {
        Ok(log_file) => {
            builder.target(env_logger::Target::Pipe(Box::new(log_file)));
        }
        Err(e) => eprintln!("Failed to open {}: {}, logging to stderr", log_file_path.display(), e),
    }
    let _ = builder.try_init();

    if rotated {
        log::info!("Previous log rotated to {}", log_file_path.with_extension("log.old").display());
    }
    log_file_path
}

/// Write panics to `<log_dir>/crash.log` before the default hook runs
pub fn setup_panic_hook(log_dir: PathBuf) {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        log::error!("PANIC at {}: {}", location, message);

        let _ = fs::create_dir_all(&log_dir);
        let crash_info = format!(
            "[{}] PANIC at {}: {}\nBacktrace (if RUST_BACKTRACE=1):\n{:?}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            location,
            message,
            std::backtrace::Backtrace::capture()
        );
        if fs::write(log_dir.join(CRASH_FILE), crash_info).is_ok() {
            eprintln!("Crash log written to: {}", log_dir.join(CRASH_FILE).display());
        }

        default_hook(info);
    }));
}
