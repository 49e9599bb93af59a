//! End-to-end bridge tests against a real local WebSocket server.
//!
//! The stub child is `cat` (copies stdin to stdout verbatim), so whatever
//! binary payload the server sends should come straight back.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use pipelet::{BridgeConfig, ChildSpec, Supervisor};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

type ServerConn = WebSocketStream<TcpStream>;

/// Bind a local server that accepts every incoming connection and hands the
/// upgraded streams to the test over a channel.
async fn ws_server() -> (SocketAddr, mpsc::Receiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            if tx.send(ws).await.is_err() {
                break;
            }
        }
    });

    (addr, rx)
}

fn start_supervisor(
    addr: SocketAddr,
    program: &str,
    args: &[&str],
    ping_secs: u64,
) -> JoinHandle<()> {
    let config = BridgeConfig {
        endpoint: format!("ws://{addr}"),
        ping_interval: Duration::from_secs(ping_secs),
        child: ChildSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        },
    };
    let mut supervisor = Supervisor::new(config);
    tokio::spawn(async move { supervisor.run().await })
}

async fn accept_conn(rx: &mut mpsc::Receiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("bridge connects within the retry window")
        .expect("server accept loop alive")
}

/// Next binary frame from the bridge, skipping control frames.
async fn next_binary(ws: &mut ServerConn) -> Option<Bytes> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next()).await.ok()??;
        match msg {
            Ok(Message::Binary(data)) => return Some(data),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

#[tokio::test]
async fn binary_frames_echo_through_child() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 60);

    let mut conn = accept_conn(&mut conns).await;
    conn.send(Message::Binary(Bytes::from_static(b"ping")))
        .await
        .unwrap();

    let echoed = next_binary(&mut conn).await.expect("echo frame");
    assert_eq!(&echoed[..], b"ping");

    supervisor.abort();
}

#[tokio::test]
async fn binary_frames_keep_their_order() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 60);

    let mut conn = accept_conn(&mut conns).await;
    for part in [b"one".as_slice(), b"two", b"three"] {
        conn.send(Message::Binary(Bytes::copy_from_slice(part)))
            .await
            .unwrap();
    }

    // cat may coalesce writes; collect until all bytes arrived.
    let mut received = Vec::new();
    while received.len() < 11 {
        let chunk = next_binary(&mut conn).await.expect("echo chunk");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"onetwothree");

    supervisor.abort();
}

#[tokio::test]
async fn text_frames_are_dropped_silently() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 60);

    let mut conn = accept_conn(&mut conns).await;
    conn.send(Message::Text("hello".into())).await.unwrap();
    conn.send(Message::Binary(Bytes::from_static(b"after")))
        .await
        .unwrap();

    // If the text frame had reached the child, its bytes would precede ours.
    let echoed = next_binary(&mut conn).await.expect("echo frame");
    assert_eq!(&echoed[..], b"after");

    supervisor.abort();
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 60);

    let mut first = accept_conn(&mut conns).await;
    first
        .send(Message::Binary(Bytes::from_static(b"one")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut first).await.unwrap()[..], b"one");

    // Abrupt close: the bridge should tear down, reap the child, and come
    // back with a fresh connection and a fresh child.
    drop(first);

    let mut second = accept_conn(&mut conns).await;
    second
        .send(Message::Binary(Bytes::from_static(b"two")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut second).await.unwrap()[..], b"two");

    supervisor.abort();
}

#[tokio::test]
async fn child_exit_tears_down_and_reconnects() {
    let (addr, mut conns) = ws_server().await;
    // `true` exits immediately: the outbound relay sees end-of-stream right
    // away and the bridge must not leave the connection half-open.
    let supervisor = start_supervisor(addr, "true", &[], 60);

    let mut first = accept_conn(&mut conns).await;

    // The bridge side closes once the child is gone.
    assert!(next_binary(&mut first).await.is_none());

    // And the supervisor keeps going with a new attempt.
    let _second = accept_conn(&mut conns).await;

    supervisor.abort();
}

#[tokio::test]
async fn teardown_completes_while_outbound_send_is_backpressured() {
    let (addr, mut conns) = ws_server().await;
    // `yes` floods its stdout, so the outbound relay is soon parked in a
    // socket send against a peer that never reads.
    let supervisor = start_supervisor(addr, "yes", &[], 60);

    let mut first = accept_conn(&mut conns).await;

    // Never read from `first`; give the flood time to fill the socket
    // buffers on both sides.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Half-close the TCP write side: the bridge's inbound relay sees its
    // read end die while the outbound send stays backpressured. Teardown
    // must still cancel the parked send, reap the child, and reconnect.
    first.get_mut().shutdown().await.unwrap();

    let _second = accept_conn(&mut conns).await;

    supervisor.abort();
    drop(first);
}

#[tokio::test]
async fn probe_failure_does_not_crash_the_bridge() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 1);

    let mut first = accept_conn(&mut conns).await;

    // Wait until the keepalive task is actively probing.
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, first.next())
            .await
            .expect("first ping within the interval")
            .expect("connection alive")
            .unwrap();
        if matches!(msg, Message::Ping(_)) {
            break;
        }
    }

    // Drop the link without a close handshake: subsequent probes fail. The
    // bridge must tear down and come back, not crash.
    drop(first);

    let mut second = accept_conn(&mut conns).await;
    second
        .send(Message::Binary(Bytes::from_static(b"still-alive")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut second).await.unwrap()[..], b"still-alive");

    supervisor.abort();
}

#[tokio::test]
async fn keepalive_pings_arrive_on_interval() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "cat", &[], 1);

    let mut conn = accept_conn(&mut conns).await;

    let mut pings = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(3500);
    while pings < 2 {
        let msg = tokio::time::timeout_at(deadline, conn.next())
            .await
            .expect("two pings within 3.5s at a 1s interval")
            .expect("connection stays alive")
            .unwrap();
        if matches!(msg, Message::Ping(_)) {
            pings += 1;
        }
    }

    supervisor.abort();
}

#[tokio::test]
async fn spawn_failure_drops_connection_and_retries() {
    let (addr, mut conns) = ws_server().await;
    let supervisor = start_supervisor(addr, "pipelet-no-such-program", &[], 60);

    // Each cycle: connect, fail to spawn, close, retry. The supervisor must
    // survive and keep attempting rather than crash.
    let first = accept_conn(&mut conns).await;
    drop(first);
    let _second = accept_conn(&mut conns).await;

    supervisor.abort();
}

#[tokio::test]
async fn stderr_is_folded_into_outbound_frames() {
    let (addr, mut conns) = ws_server().await;
    // Child writes to stderr only, then sleeps so the session stays up.
    let supervisor = start_supervisor(
        addr,
        "sh",
        &["-c", "printf diag >&2; sleep 30"],
        60,
    );

    let mut conn = accept_conn(&mut conns).await;
    let frame = next_binary(&mut conn).await.expect("stderr frame");
    assert_eq!(&frame[..], b"diag");

    supervisor.abort();
}
