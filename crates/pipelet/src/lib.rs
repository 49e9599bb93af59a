//! pipelet: WebSocket-to-stdio transport bridge for tool server subprocesses.
//!
//! A pipelet instance connects a remote WebSocket endpoint to one locally
//! spawned child process, relaying binary frames to the child's stdin and
//! the child's stdout/stderr back as binary frames. The payload protocol is
//! opaque; the child defines it.

pub mod bridge;
pub mod child;
pub mod config;
pub mod connector;
pub mod supervisor;

pub use bridge::StreamBridge;
pub use child::{ChildIo, ChildSpawner, ChildSpec, CommandSpawner, SpawnError, ToolProcess};
pub use config::{BridgeConfig, Cli, ConfigError, DEFAULT_PING_INTERVAL_SECS, MAX_FRAME_BYTES};
pub use connector::{ConnState, Connector, WsStream};
pub use supervisor::Supervisor;
