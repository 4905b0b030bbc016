//! Logging setup and reopen (C11), in the `fern`/`log` style used
//! throughout the corpus's `servers` binaries.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::SetupError;

/// Tracks the currently open log directory so `reopen()` can rebuild a
/// fresh timestamped file in it without the caller re-threading `log_dir`.
static CURRENT_LOG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);

/// The live file handle the `fern` chain is currently writing through.
/// `reopen()` swaps the `File` inside this `Mutex` in place, so the
/// `ReopenableFile` clone `fern::Dispatch` holds picks up the new file on
/// its very next write, without re-running `apply()` — which `fern` only
/// allows once per process.
static CURRENT_LOG_FILE: Mutex<Option<Arc<Mutex<File>>>> = Mutex::new(None);

/// `Write` indirection over a shared file handle. `fern::Dispatch` is
/// handed one of these, boxed, as its file sink; swapping the `File`
/// behind the shared `Arc<Mutex<_>>` redirects subsequent log lines
/// without touching the dispatch chain itself.
struct ReopenableFile(Arc<Mutex<File>>);

impl Write for ReopenableFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log file mutex poisoned").write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().expect("log file mutex poisoned").flush()
    }
}

/// Builds the `fern::Dispatch` chain: stdout plus a timestamped, rotated
/// log file, level parsed the way `yahoo_logic::logger::setup_logging`
/// parses it. The file sink is wrapped in `ReopenableFile` so `reopen()`
/// can redirect it later without re-applying the dispatch chain.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<(), SetupError> {
    fs::create_dir_all(log_dir).map_err(|e| SetupError::LogOpen(log_dir.to_path_buf(), e))?;
    cleanup_old_logs(log_dir).map_err(|e| SetupError::LogOpen(log_dir.to_path_buf(), e))?;

    let log_path = timestamped_log_path(log_dir);
    let level = parse_level(log_level);
    let file = open_log_file(&log_path).map_err(|e| SetupError::LogOpen(log_path.clone(), e))?;
    let file = Arc::new(Mutex::new(file));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::Output::writer(Box::new(ReopenableFile(file.clone())), "\n"))
        .apply()
        .map_err(|e| SetupError::LogOpen(log_path, std::io::Error::other(e)))?;

    *CURRENT_LOG_DIR.lock().expect("log-dir mutex poisoned") = Some(log_dir.to_path_buf());
    *CURRENT_LOG_FILE.lock().expect("log-file mutex poisoned") = Some(file);
    Ok(())
}

/// Re-opens the log-file sink in place and redirects `stderr` onto it, per
/// `LifecycleController::on_reopen_log` (§4.8: "reopen log files; redirect
/// stderr"). `fern::Dispatch::apply()` can only run once per process, so
/// reopening swaps the `File` behind the shared `ReopenableFile` handle
/// the dispatch chain already holds rather than rebuilding the chain —
/// exactly what lets an external `logrotate`-style rename/truncate of the
/// old path be picked up.
pub fn reopen() -> Result<(), SetupError> {
    let log_dir = CURRENT_LOG_DIR.lock().expect("log-dir mutex poisoned").clone();
    let Some(log_dir) = log_dir else {
        return Ok(()); // logging was never set up (e.g. in tests)
    };

    cleanup_old_logs(&log_dir).map_err(|e| SetupError::LogOpen(log_dir.clone(), e))?;

    let new_path = timestamped_log_path(&log_dir);
    let new_file = open_log_file(&new_path).map_err(|e| SetupError::LogOpen(new_path.clone(), e))?;

    if let Err(e) = redirect_stderr_to(&new_file) {
        log::warn!("failed to redirect stderr during log reopen: {e}");
    }

    let slot = CURRENT_LOG_FILE.lock().expect("log-file mutex poisoned").clone();
    if let Some(slot) = slot {
        *slot.lock().expect("log file mutex poisoned") = new_file;
    }

    log::info!("log reopened at {}", new_path.display());
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Duplicates `file`'s descriptor onto fd 2, so anything writing directly
/// to `stderr` (this process or a dependency) lands in the same file the
/// `fern` chain now writes through.
fn redirect_stderr_to(file: &File) -> nix::Result<()> {
    let stderr_fd = std::io::stderr().as_raw_fd();
    nix::unistd::dup2(file.as_raw_fd(), stderr_fd).map(|_| ())
}

fn timestamped_log_path(log_dir: &Path) -> PathBuf {
    let name = format!("proxy_worker_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    log_dir.join(name)
}

fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Keeps only the most recent log file in `log_dir`, mirroring
/// `yahoo_logic::logger::cleanup_old_logs`.
fn cleanup_old_logs(log_dir: &Path) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension() == Some(OsStr::new("log")))
        .collect();

    entries.sort_by_key(|e| {
        std::cmp::Reverse(e.metadata().and_then(|m| m.modified()).ok())
    });

    for entry in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            log::warn!("failed to remove stale log file {:?}: {e}", entry.path());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_falls_back_to_info_for_unknown_strings() {
        assert_eq!(parse_level("chatty"), log::LevelFilter::Info);
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
    }

    #[test]
    fn cleanup_keeps_only_the_newest_log_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.log", "b.log", "c.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        cleanup_old_logs(dir.path()).unwrap();
        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        // c.txt is untouched (not a .log file); exactly one .log survives.
        let log_count = remaining.iter().filter(|n| n.to_string_lossy().ends_with(".log")).count();
        assert_eq!(log_count, 1);
        assert!(remaining.iter().any(|n| n == "c.txt"));
    }

    #[test]
    fn reopenable_file_writes_follow_a_swapped_inner_file() {
        // Exercises the same swap `reopen()` performs on `CURRENT_LOG_FILE`,
        // without going through `setup_logging` (which calls
        // `fern::Dispatch::apply()`, a once-per-process global).
        let dir = tempfile::tempdir().unwrap();
        let first_path = dir.path().join("first.log");
        let second_path = dir.path().join("second.log");

        let first = open_log_file(&first_path).unwrap();
        let shared = Arc::new(Mutex::new(first));
        let mut sink = ReopenableFile(shared.clone());

        sink.write_all(b"before reopen\n").unwrap();

        let second = open_log_file(&second_path).unwrap();
        *shared.lock().unwrap() = second;

        sink.write_all(b"after reopen\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&first_path).unwrap(), "before reopen\n");
        assert_eq!(fs::read_to_string(&second_path).unwrap(), "after reopen\n");
    }
}
