//! Connection supervisor - owns the reconnect/respawn lifecycle.
//!
//! Flow, repeated forever:
//! 1. Acquire a live connection (connector retries internally)
//! 2. Spawn one tool process for that connection
//! 3. Run the stream bridge to completion
//! 4. Terminate and reap the process, unconditionally
//! 5. Loop back for the next connection
//!
//! The loop only ends with the process-wide interrupt, which `main` races
//! against `run()`.

use std::sync::Arc;

use crate::bridge::StreamBridge;
use crate::child::{ChildSpawner, CommandSpawner};
use crate::config::BridgeConfig;
use crate::connector::Connector;

pub struct Supervisor {
    config: BridgeConfig,
    connector: Connector,
    bridge: StreamBridge,
    spawner: Arc<dyn ChildSpawner>,
}

impl Supervisor {
    pub fn new(config: BridgeConfig) -> Self {
        let connector = Connector::new(config.endpoint.clone());
        let bridge = StreamBridge::new(config.ping_interval);
        Self {
            config,
            connector,
            bridge,
            spawner: Arc::new(CommandSpawner),
        }
    }

    /// Swap the spawn strategy (tests substitute stub children).
    pub fn with_spawner(mut self, spawner: Arc<dyn ChildSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Maintain at most one live connection/process pair, re-establishing the
    /// pair after any disconnection, forever.
    pub async fn run(&mut self) {
        loop {
            tracing::info!(endpoint = %self.config.endpoint, "Connecting to endpoint");
            let mut ws = self.connector.acquire().await;
            tracing::info!(endpoint = %self.config.endpoint, "Connected");

            let (proc, io) = match self.spawner.spawn(&self.config.child) {
                Ok(spawned) => spawned,
                Err(e) => {
                    // Fatal for this attempt only: drop the connection and
                    // go back around the loop.
                    tracing::error!(
                        program = %self.config.child.program,
                        error = %e,
                        "Failed to spawn tool process"
                    );
                    let _ = ws.close(None).await;
                    self.connector.mark_disconnected();
                    continue;
                }
            };

            self.bridge.run(ws, io).await;

            // The supervisor owns final process cleanup, even if the bridge's
            // teardown already ended both relays. terminate() tolerates a
            // process that is already gone.
            proc.terminate().await;
            self.connector.mark_disconnected();
            tracing::info!("Disconnected, will reconnect");
        }
    }
}
