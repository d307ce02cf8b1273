//! `ServerConfig`: the read-only, process-lifetime configuration the
//! session engine is built against, plus the `clap`-derived CLI that
//! assembles one.

use std::time::Duration;

use clap::Parser;

/// WebSocket-to-PTY bridge server.
#[derive(Debug, Parser)]
#[command(name = "wsty", version, about, long_about = None)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "WSTY_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to bind the HTTP/WebSocket listener to.
    #[arg(short = 'p', long, env = "WSTY_PORT", default_value_t = 7681)]
    pub port: u16,

    /// Shared secret clients must present via JSON_DATA before a PTY is
    /// spawned. When unset, no authentication is required.
    #[arg(short = 'c', long, env = "WSTY_CREDENTIAL")]
    pub credential: Option<String>,

    /// Reject INPUT frames; the terminal becomes output-only.
    #[arg(short = 'R', long)]
    pub readonly: bool,

    /// Require the WebSocket Origin header to match Host.
    #[arg(long)]
    pub check_origin: bool,

    /// Exit after the first session closes.
    #[arg(short = 'o', long)]
    pub once: bool,

    /// Maximum number of concurrent sessions (0 = unlimited).
    #[arg(short = 'm', long, default_value_t = 0)]
    pub max_clients: u32,

    /// Signal sent to the child process on session teardown.
    #[arg(short = 's', long, default_value = "SIGHUP")]
    pub sig_name: String,

    /// Reconnect hint (seconds) sent to the client during the handshake.
    #[arg(long, default_value_t = 10)]
    pub reconnect: u32,

    /// Grace period, in seconds, to wait after `sig_name` before escalating
    /// to SIGKILL. 0 disables escalation (the child is waited on forever).
    #[arg(long, default_value_t = 0)]
    pub kill_grace_secs: u64,

    /// Increase log verbosity (-v, -vv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Silence all logging below errors, overriding `-v` and `RUST_LOG`.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Command and arguments to run as the terminal program.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// Immutable, process-lifetime configuration for the session engine.
///
/// Everything the core reads is captured here at startup; nothing under
/// `server`/`session` touches `std::env` or CLI state directly.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub argv: Vec<String>,
    pub credential: Option<String>,
    pub readonly: bool,
    pub check_origin: bool,
    pub once: bool,
    pub max_clients: u32,
    pub sig_code: i32,
    pub sig_name: String,
    pub reconnect: u32,
    pub prefs_json: String,
    pub bind_addr: String,
    pub port: u16,
    pub kill_grace: Option<Duration>,
}

/// Errors that can occur while turning CLI input into a `ServerConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("unknown signal name: {0}")]
    UnknownSignal(String),
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        let sig_code = signal_code(&cli.sig_name)?;
        Ok(ServerConfig {
            argv: cli.command,
            credential: cli.credential.filter(|s| !s.is_empty()),
            readonly: cli.readonly,
            check_origin: cli.check_origin,
            once: cli.once,
            max_clients: cli.max_clients,
            sig_code,
            sig_name: cli.sig_name,
            reconnect: cli.reconnect,
            prefs_json: "{}".to_string(),
            bind_addr: cli.bind,
            port: cli.port,
            kill_grace: (cli.kill_grace_secs > 0)
                .then(|| Duration::from_secs(cli.kill_grace_secs)),
        })
    }
}

/// Resolve a signal name (e.g. "SIGHUP", "SIGTERM") to its numeric code.
///
/// This is deliberately a small, explicit table rather than a dependency on
/// a signal-name-parsing crate: the set of signals an operator would
/// reasonably choose to terminate a child with is small and fixed.
fn signal_code(name: &str) -> Result<i32, ConfigError> {
    let normalized = name.trim().to_uppercase();
    let code = match normalized.as_str() {
        "SIGHUP" | "HUP" => 1,
        "SIGINT" | "INT" => 2,
        "SIGQUIT" | "QUIT" => 3,
        "SIGKILL" | "KILL" => 9,
        "SIGTERM" | "TERM" => 15,
        "SIGUSR1" | "USR1" => 10,
        "SIGUSR2" | "USR2" => 12,
        _ => return Err(ConfigError::UnknownSignal(name.to_string())),
    };
    Ok(code)
}
