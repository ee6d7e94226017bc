//! CLI definitions for relaypick.

use clap::{builder::PossibleValuesParser, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Default ALPN protocol identifier.
pub const DEFAULT_ALPN: &str = "relaypick/1";

/// Default relay port when a `rel://` address omits one.
pub const DEFAULT_RELAY_PORT: u16 = 4433;

/// Default overall pick deadline in seconds.
pub const DEFAULT_PICK_TIMEOUT_SECS: u64 = 10;

/// Default QUIC idle timeout in seconds.
///
/// Bounds how long a dial to a dead candidate can take; keep this well
/// below the pick deadline.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5;

/// Default keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 3;

/// Token file name inside the configuration directory.
pub const TOKENS_FILENAME: &str = "tokens";

/// Parse a duration from a human-readable string.
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Relay server picker: probes rel:// candidates concurrently and selects
/// the first reachable, authorized relay.
#[derive(Debug, Parser)]
#[command(name = "relaypick")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (debug|info|warn|error)
    #[arg(long, global = true, default_value = "info", value_parser = PossibleValuesParser::new(["debug", "info", "warn", "error"]))]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pick one relay server from the given candidates
    Pick(PickArgs),

    /// Show version information
    Version,
}

/// Arguments for the pick subcommand.
#[derive(Debug, Parser)]
pub struct PickArgs {
    /// Peer identity used for token lookup and the bind handshake
    #[arg(long)]
    pub peer: String,

    /// Candidate relay address (repeatable, e.g. rel://relay.example.com:4433)
    #[arg(long = "relay", required = true)]
    pub relays: Vec<String>,

    /// Overall pick deadline
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub timeout: Duration,

    /// Auth token for --peer (overrides any token file)
    #[arg(long)]
    pub token: Option<String>,

    /// Token file path (one `peer-id token` pair per line)
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Configuration directory path
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// TLS SNI hostname override (default: candidate host)
    #[arg(long)]
    pub sni: Option<String>,

    /// Root CA certificate file path
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// Disable certificate verification (development only)
    #[arg(long, default_value_t = false)]
    pub insecure_skip_verify: bool,

    /// Public key fingerprint (SHA-256 hex)
    #[arg(long)]
    pub fingerprint: Option<String>,

    /// ALPN protocol identifier
    #[arg(long, default_value = DEFAULT_ALPN)]
    pub alpn: String,

    /// QUIC idle timeout (bounds each candidate dial)
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub idle_timeout: Duration,

    /// QUIC keep-alive interval (0 to disable)
    #[arg(long, value_parser = parse_duration, default_value = "3s")]
    pub keep_alive: Duration,
}

/// Returns the default configuration directory.
///
/// - root (UID=0): `/etc/relaypick`
/// - others: `~/.relaypick`
pub fn default_config_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/etc/relaypick")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".relaypick")
    }
}

/// Check if running as root.
fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: getuid() is a simple syscall that returns the real user ID.
        // It has no preconditions and always succeeds.
        unsafe { libc::getuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Build information for version command.
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub built: &'static str,
}

impl BuildInfo {
    /// Returns build information from environment variables or defaults.
    pub fn get() -> Self {
        Self {
            version: option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
            commit: option_env!("RELAYPICK_COMMIT").unwrap_or("unknown"),
            built: option_env!("RELAYPICK_BUILD_DATE").unwrap_or("unknown"),
        }
    }

    /// Format version output.
    pub fn format(&self) -> String {
        format!(
            "relaypick version {}\n  commit: {}\n  built:  {}",
            self.version, self.commit, self.built
        )
    }
}
