//! Startup configuration.
//!
//! All external inputs (endpoint, ping interval, child command line) are
//! resolved here, once, before any connection attempt. The rest of the crate
//! takes an explicit `BridgeConfig` and never reads ambient state.

use std::time::Duration;

use clap::Parser;
use tokio_tungstenite::tungstenite::http::Uri;

use crate::child::ChildSpec;

/// Seconds between keepalive pings when nothing else is configured.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 20;

/// Largest inbound frame the connection layer will accept.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Env var consulted for the ping interval when `--ping-interval` is absent.
const PING_INTERVAL_ENV: &str = "MCP_PING_INTERVAL";

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "pipelet",
    about = "Bridge a stdio tool server to a remote WebSocket endpoint"
)]
pub struct Cli {
    /// WebSocket endpoint to connect to (ws:// or wss://).
    #[arg(long, env = "MCP_ENDPOINT")]
    pub endpoint: String,

    /// Seconds between keepalive pings.
    #[arg(long)]
    pub ping_interval: Option<u64>,

    /// Tool server command line: program followed by its arguments.
    #[arg(required = true, num_args = 1.., value_name = "COMMAND", trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("endpoint {endpoint:?} must use ws:// or wss://")]
    UnsupportedScheme { endpoint: String },
    #[error("child command line is empty")]
    EmptyCommand,
}

/// Resolved configuration, constructed once at startup and passed by
/// reference into the supervisor.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub endpoint: String,
    pub ping_interval: Duration,
    pub child: ChildSpec,
}

impl BridgeConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        validate_endpoint(&cli.endpoint)?;

        let mut command = cli.command.into_iter();
        let program = command.next().ok_or(ConfigError::EmptyCommand)?;
        let child = ChildSpec {
            program,
            args: command.collect(),
        };

        let interval_env = std::env::var(PING_INTERVAL_ENV).ok();
        let secs = cli
            .ping_interval
            .or_else(|| parse_interval(interval_env.as_deref()))
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PING_INTERVAL_SECS);

        Ok(Self {
            endpoint: cli.endpoint,
            ping_interval: Duration::from_secs(secs),
            child,
        })
    }
}

/// Lenient env parse: unset, non-numeric, or zero all fall back to default.
fn parse_interval(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).filter(|s| *s > 0)
}

/// The endpoint must be a well-formed ws/wss URI. Checked before any connect
/// attempt so a bad value fails the process at startup.
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("{e}"),
        })?;

    match uri.scheme_str() {
        Some("ws") | Some("wss") => Ok(()),
        _ => Err(ConfigError::UnsupportedScheme {
            endpoint: endpoint.to_string(),
        }),
    }
}
