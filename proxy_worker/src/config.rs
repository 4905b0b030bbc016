//! Process configuration (C10).
//!
//! CLI flags and environment variables via `clap`, with an optional JSON
//! file (`--config-path`) merged underneath — CLI/env values always win,
//! the file only fills in what was left at its default, the way
//! `yahoo_logic::config::load_config` layers its own `Config`.

use std::fs;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::ticket::key::Cipher;

/// `tls_ticket_key_cipher`'s value when neither CLI/env nor a config file
/// names one explicitly (mirrors the `aes-128-cbc` the field used to carry
/// as a clap `default_value`, now applied in `Args::cipher` instead so
/// `tls_ticket_key_cipher_given` can tell "defaulted" from "explicit").
const DEFAULT_TLS_TICKET_KEY_CIPHER: &str = "aes-128-cbc";

/// Descriptors the parent supervisor inherits into the worker (§6). Kept
/// distinct from `Config` since these are per-exec, never loaded from a
/// file.
#[derive(Debug, Clone, Copy)]
pub struct WorkerProcessConfig {
    /// IPv4 listen socket, or `-1` if absent. `-1` is the uniform
    /// "absent" sentinel for both `server_fd` and `server_fd6`.
    pub server_fd: RawFd,
    /// IPv6 listen socket, or `-1` if absent.
    pub server_fd6: RawFd,
    /// IPC byte-stream descriptor; the parent holds the write end.
    pub ipc_fd: RawFd,
}

impl WorkerProcessConfig {
    pub fn from_env(args: &Args) -> Self {
        Self {
            server_fd: args.server_fd,
            server_fd6: args.server_fd6,
            ipc_fd: args.ipc_fd,
        }
    }
}

/// CLI/env/file-loadable process configuration. `#[serde(default)]` backs
/// every field with `Args::default()` below, so a config file that only
/// sets a handful of fields still deserializes instead of being rejected
/// (and silently dropped by `load_config`'s `.ok()`) over the fields it
/// left unset.
#[derive(Parser, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Args {
    /// Number of worker threads (≥1); `1` runs the single-worker mode
    /// where the control loop itself serves connections.
    #[clap(long, env = "PW_NUM_WORKER", default_value = "1")]
    pub num_worker: usize,

    /// UID to drop to after binding, if running as root.
    #[clap(long, env = "PW_UID", default_value = "0")]
    pub uid: u32,

    /// GID to drop to alongside `uid`.
    #[clap(long, env = "PW_GID", default_value = "0")]
    pub gid: u32,

    /// User name passed to `initgroups`.
    #[clap(long, env = "PW_USER", default_value = "")]
    pub user: String,

    #[clap(long, env = "PW_UPSTREAM_NO_TLS")]
    pub upstream_no_tls: bool,

    #[clap(long, env = "PW_NO_OCSP")]
    pub no_ocsp: bool,

    /// `aes-128-cbc` or `aes-256-cbc`. No `default_value`: absence is
    /// meaningful (see `tls_ticket_key_cipher_given`) and is resolved to
    /// `DEFAULT_TLS_TICKET_KEY_CIPHER` only by `Args::cipher`.
    #[clap(long, env = "PW_TLS_TICKET_KEY_CIPHER")]
    pub tls_ticket_key_cipher: Option<String>,

    /// Whether `tls_ticket_key_cipher` was explicitly supplied by CLI,
    /// env, or config file, as opposed to defaulted (§6). Not itself a
    /// CLI flag — `load_config` derives it from `tls_ticket_key_cipher`
    /// after CLI/file merging settles.
    #[clap(skip)]
    pub tls_ticket_key_cipher_given: bool,

    /// Paths to load a fixed ticket-key set from at startup, in order
    /// (position 0 = first file). Non-empty bypasses the rotator (C3)
    /// entirely, per §6.
    #[clap(long, env = "PW_TLS_TICKET_KEY_FILES", value_delimiter = ',')]
    pub tls_ticket_key_files: Vec<PathBuf>,

    /// Selects the remote fetcher (C4) over the local rotator (C3) when
    /// present.
    #[clap(long, env = "PW_TLS_TICKET_KEY_MEMCACHED_HOST")]
    pub tls_ticket_key_memcached_host: Option<String>,

    /// Ticket-key retention window, in seconds.
    #[clap(long, env = "PW_TLS_SESSION_TIMEOUT", default_value = "3600")]
    pub tls_session_timeout_secs: u64,

    #[clap(long, env = "PW_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PW_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[clap(long, env = "PW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Inherited IPv4 listen descriptor, or `-1` if absent.
    #[clap(long, env = "PW_SERVER_FD", default_value = "-1")]
    pub server_fd: RawFd,

    /// Inherited IPv6 listen descriptor, or `-1` if absent.
    #[clap(long, env = "PW_SERVER_FD6", default_value = "-1")]
    pub server_fd6: RawFd,

    /// Inherited IPC read descriptor.
    #[clap(long, env = "PW_IPC_FD", default_value = "-1")]
    pub ipc_fd: RawFd,
}

impl Default for Args {
    /// Mirrors every clap `default_value` above field-for-field, so
    /// `#[serde(default)]` fills in exactly what an absent CLI flag
    /// would have.
    fn default() -> Self {
        Self {
            num_worker: 1,
            uid: 0,
            gid: 0,
            user: String::new(),
            upstream_no_tls: false,
            no_ocsp: false,
            tls_ticket_key_cipher: None,
            tls_ticket_key_cipher_given: false,
            tls_ticket_key_files: Vec::new(),
            tls_ticket_key_memcached_host: None,
            tls_session_timeout_secs: 3600,
            config_path: None,
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            server_fd: -1,
            server_fd6: -1,
            ipc_fd: -1,
        }
    }
}

impl Args {
    pub fn tls_session_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_session_timeout_secs)
    }

    pub fn cipher(&self) -> Result<Cipher, String> {
        self.tls_ticket_key_cipher
            .as_deref()
            .unwrap_or(DEFAULT_TLS_TICKET_KEY_CIPHER)
            .parse()
    }
}

/// Loads `Args` the way `yahoo_logic::config::load_config` does: parse
/// CLI/env first, then — if `--config-path` names a readable JSON file —
/// fill in only the fields the CLI left at their default.
pub fn load_config() -> Args {
    let cli = Args::parse();

    let from_file = cli
        .config_path
        .as_ref()
        .and_then(|path| fs::read_to_string(path).ok())
        .and_then(|contents| serde_json::from_str::<Args>(&contents).ok());

    let mut args = match from_file {
        Some(file) => merge(cli, file),
        None => cli,
    };
    args.tls_ticket_key_cipher_given = args.tls_ticket_key_cipher.is_some();
    args
}

/// CLI/env values always win; a file value only applies where the CLI
/// left the built-in default untouched.
fn merge(cli: Args, file: Args) -> Args {
    let defaults = Args::default();
    Args {
        num_worker: pick(cli.num_worker, file.num_worker, defaults.num_worker),
        uid: pick(cli.uid, file.uid, defaults.uid),
        gid: pick(cli.gid, file.gid, defaults.gid),
        user: pick(cli.user, file.user, defaults.user),
        upstream_no_tls: cli.upstream_no_tls || file.upstream_no_tls,
        no_ocsp: cli.no_ocsp || file.no_ocsp,
        tls_ticket_key_cipher: cli.tls_ticket_key_cipher.or(file.tls_ticket_key_cipher),
        // Recomputed by `load_config` once the merge settles; a placeholder
        // here would only be overwritten anyway.
        tls_ticket_key_cipher_given: false,
        tls_ticket_key_files: if cli.tls_ticket_key_files.is_empty() {
            file.tls_ticket_key_files
        } else {
            cli.tls_ticket_key_files
        },
        tls_ticket_key_memcached_host: cli.tls_ticket_key_memcached_host.or(file.tls_ticket_key_memcached_host),
        tls_session_timeout_secs: pick(
            cli.tls_session_timeout_secs,
            file.tls_session_timeout_secs,
            defaults.tls_session_timeout_secs,
        ),
        config_path: cli.config_path,
        log_dir: pick(cli.log_dir, file.log_dir, defaults.log_dir),
        log_level: pick(cli.log_level, file.log_level, defaults.log_level),
        server_fd: pick(cli.server_fd, file.server_fd, defaults.server_fd),
        server_fd6: pick(cli.server_fd6, file.server_fd6, defaults.server_fd6),
        ipc_fd: pick(cli.ipc_fd, file.ipc_fd, defaults.ipc_fd),
    }
}

fn pick<T: PartialEq>(cli: T, file: T, default: T) -> T {
    if cli == default {
        file
    } else {
        cli
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_parses_known_names() {
        let args = Args::parse_from(["proxy_worker", "--tls-ticket-key-cipher", "aes-256-cbc"]);
        assert_eq!(args.cipher().unwrap(), Cipher::Aes256Cbc);
    }

    #[test]
    fn cipher_falls_back_to_aes128_when_not_given() {
        let args = Args::parse_from(["proxy_worker"]);
        assert_eq!(args.cipher().unwrap(), Cipher::Aes128Cbc);
    }

    #[test]
    fn tls_ticket_key_cipher_given_reflects_explicit_supply_only() {
        let default_args = load_config_from(["proxy_worker"]);
        assert!(!default_args.tls_ticket_key_cipher_given);

        let explicit_args = load_config_from(["proxy_worker", "--tls-ticket-key-cipher", "aes-256-cbc"]);
        assert!(explicit_args.tls_ticket_key_cipher_given);
    }

    /// Test-only seam mirroring `load_config`'s post-parse finalize step,
    /// without touching real argv/config-file I/O.
    fn load_config_from<I, T>(argv: I) -> Args
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut args = Args::parse_from(argv);
        args.tls_ticket_key_cipher_given = args.tls_ticket_key_cipher.is_some();
        args
    }

    #[test]
    fn defaults_yield_a_single_worker_with_no_inherited_descriptors() {
        let args = Args::parse_from(["proxy_worker"]);
        assert_eq!(args.num_worker, 1);
        assert_eq!(args.server_fd, -1);
        assert_eq!(args.server_fd6, -1);
    }

    #[test]
    fn tls_session_timeout_converts_seconds_to_duration() {
        let args = Args::parse_from(["proxy_worker", "--tls-session-timeout", "7200"]);
        assert_eq!(args.tls_session_timeout(), Duration::from_secs(7200));
    }

    #[test]
    fn partial_config_file_deserializes_via_serde_default() {
        // Only one field set; every other field must fall back to
        // `Args::default()` instead of failing the whole deserialize.
        let partial = r#"{"numWorker": 4}"#;
        let parsed: Args = serde_json::from_str(partial).expect("partial file should deserialize");
        assert_eq!(parsed.num_worker, 4);
        assert_eq!(parsed.log_dir, PathBuf::from("./logs"));
        assert_eq!(parsed.server_fd, -1);
        assert!(parsed.tls_ticket_key_cipher.is_none());
    }
}
