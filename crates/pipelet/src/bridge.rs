//! Stream bridge: couples one live connection to one tool process.
//!
//! Three tasks run for the life of a connection/process pair:
//! - inbound relay: binary frames from the socket into child stdin
//! - outbound relay: child stdout+stderr chunks out as binary frames
//! - keepalive: periodic pings on the socket
//!
//! Teardown waits on the first of the two relays to finish, then cancels
//! everything through a shared token and returns. The supervisor owns
//! terminating the child afterwards.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::child::ChildIo;
use crate::connector::WsStream;

/// Read size for child output; each chunk becomes one binary frame.
const OUTPUT_CHUNK_BYTES: usize = 4096;

/// Buffered output chunks between the stream pumps and the socket writer.
const OUTPUT_CHANNEL_DEPTH: usize = 16;

type SharedSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Bridges one connection to one child process until either relay direction
/// ends.
pub struct StreamBridge {
    ping_interval: Duration,
}

impl StreamBridge {
    pub fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }

    /// Relay until the connection or the process is done, then cancel all
    /// outstanding work for this pair and return.
    pub async fn run(&self, ws: WsStream, io: ChildIo) {
        let (sink, stream) = ws.split();
        let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
        let cancel = CancellationToken::new();

        let mut inbound = tokio::spawn(inbound_relay(stream, io.stdin, cancel.child_token()));
        let mut outbound = tokio::spawn(outbound_relay(
            io.stdout,
            io.stderr,
            Arc::clone(&sink),
            cancel.child_token(),
        ));
        let keepalive = tokio::spawn(keepalive(sink, self.ping_interval, cancel.child_token()));

        // First relay to finish triggers teardown. The keepalive task is
        // deliberately not part of this wait: a failed probe alone does not
        // end the session, only a relay noticing the dead link does.
        tokio::select! {
            res = &mut inbound => {
                log_task_end("inbound relay", res);
                cancel.cancel();
                await_task("outbound relay", outbound).await;
            }
            res = &mut outbound => {
                log_task_end("outbound relay", res);
                cancel.cancel();
                await_task("inbound relay", inbound).await;
            }
        }

        await_task("keepalive", keepalive).await;
        tracing::debug!("Bridge session ended");
    }
}

fn log_task_end(name: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::warn!(task = name, error = %e, "Bridge task panicked");
    }
}

async fn await_task(name: &str, handle: JoinHandle<()>) {
    log_task_end(name, handle.await);
}

/// Connection -> child stdin.
///
/// Binary frames are written and flushed in arrival order; the flush applies
/// the child's input backpressure to this task instead of dropping data. Any
/// non-binary frame is discarded without forwarding. Connection close or a
/// stream error ends the task normally.
async fn inbound_relay(
    mut stream: SplitStream<WsStream>,
    mut stdin: tokio::process::ChildStdin,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Binary(data))) => {
                let written = tokio::select! {
                    () = cancel.cancelled() => break,
                    res = write_to_child(&mut stdin, &data) => res,
                };
                if let Err(e) = written {
                    tracing::warn!(error = %e, "Child stdin write failed, inbound relay ending");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                tracing::info!("Connection closed by peer");
                break;
            }
            // Text, ping, and pong frames carry no payload for the child.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Connection read failed, inbound relay ending");
                break;
            }
            None => {
                tracing::debug!("Connection stream exhausted");
                break;
            }
        }
    }
}

async fn write_to_child(
    stdin: &mut tokio::process::ChildStdin,
    data: &[u8],
) -> std::io::Result<()> {
    stdin.write_all(data).await?;
    stdin.flush().await
}

/// Child stdout+stderr -> connection.
///
/// Both output streams are folded into one chunk channel (ordered within
/// each stream) and sent as binary frames. The channel drains to None once
/// both pumps hit end-of-stream, which means the process exited or closed
/// its output; that ends the task. A send failure ends it too.
async fn outbound_relay(
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    sink: SharedSink,
    cancel: CancellationToken,
) {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_DEPTH);

    let stderr_tx = chunk_tx.clone();
    tokio::spawn(pump_output("stdout", stdout, chunk_tx, cancel.child_token()));
    tokio::spawn(pump_output("stderr", stderr, stderr_tx, cancel.child_token()));

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => break,
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => {
                    tracing::info!("Child output closed, outbound relay ending");
                    break;
                }
            },
        };

        // The send can park indefinitely under socket backpressure; it must
        // still observe cancellation so teardown never hangs on this task.
        let sent = tokio::select! {
            () = cancel.cancelled() => break,
            res = async {
                let mut sink = sink.lock().await;
                sink.send(Message::Binary(chunk)).await
            } => res,
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Connection send failed, outbound relay ending");
            break;
        }
    }
}

/// Reads bounded chunks from one child output stream into the shared chunk
/// channel. Ends on end-of-stream, read error, cancellation, or a dropped
/// receiver.
async fn pump_output<R>(name: &'static str, mut reader: R, tx: mpsc::Sender<Bytes>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK_BYTES];
    loop {
        let n = tokio::select! {
            () = cancel.cancelled() => return,
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    tracing::debug!(stream = name, "Child output stream ended");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(stream = name, error = %e, "Child output read failed");
                    return;
                }
            },
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        if tx.send(chunk).await.is_err() {
            return;
        }
    }
}

/// Periodic liveness probe on the connection.
///
/// A failed probe stops further probes but ends only this task; teardown is
/// driven by the relays. Cancellation mid-sleep is a no-op termination.
async fn keepalive(sink: SharedSink, period: Duration, cancel: CancellationToken) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sent = tokio::select! {
            () = cancel.cancelled() => break,
            res = async {
                let mut sink = sink.lock().await;
                sink.send(Message::Ping(Bytes::new())).await
            } => res,
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Keepalive probe failed, stopping probes");
            break;
        }
    }
}
