//! Per-socket duplex pump.
//!
//! The inbound pump runs on the connection's task; the outbound pump is
//! spawned. Both share a cancellation token that is a child of the process
//! shutdown token, and whichever pump ends first cancels the other. On
//! teardown the client is always removed from the hub before the socket is
//! closed.

use crate::hub::{ClientHandle, ClientId, SubscriberHub};
use crate::models::{ControlAction, ControlFrame};
use crate::observability::metrics;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

static OPEN_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Keeps `attendance_ws_connections_active` in step with live connections.
struct ConnectionGauge;

impl ConnectionGauge {
    fn open() -> Self {
        let open = OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_ws_connections_active(open);
        Self
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        let open = OPEN_CONNECTIONS
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_ws_connections_active(open);
    }
}

/// Serve an upgraded WebSocket until either side closes or shutdown begins.
pub async fn serve_socket(
    socket: WebSocket,
    hub: Arc<SubscriberHub>,
    queue_capacity: usize,
    shutdown: CancellationToken,
) {
    let (sink, stream) = socket.split();
    run_connection(stream, sink, hub, queue_capacity, shutdown).await;
}

/// Stop accepting tracked connections and wait up to `deadline` for the open
/// ones to finish. Returns `false` if the deadline passed first.
///
/// Call after the shutdown token has been cancelled.
pub async fn drain_connections(connections: &TaskTracker, deadline: Duration) -> bool {
    connections.close();
    let open = connections.len();

    if tokio::time::timeout(deadline, connections.wait()).await.is_ok() {
        info!(target: "attendance.ws", connections = open, "WebSocket connections closed");
        true
    } else {
        warn!(
            target: "attendance.ws",
            remaining = connections.len(),
            "WebSocket connections still open at the shutdown deadline"
        );
        false
    }
}

/// Drive one client connection over any message stream/sink pair.
#[instrument(skip_all, name = "attendance.ws.connection")]
pub async fn run_connection<S, K, E>(
    stream: S,
    sink: K,
    hub: Arc<SubscriberHub>,
    queue_capacity: usize,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: Display + Send,
{
    let _gauge = ConnectionGauge::open();
    let (client, outbound_rx) = ClientHandle::channel(queue_capacity);
    let client_id = client.id();
    let cancel = shutdown.child_token();

    info!(target: "attendance.ws", client_id = %client_id, "Client connected");

    let outbound = tokio::spawn(outbound_pump(sink, outbound_rx, cancel.clone(), client_id));

    inbound_pump(stream, &client, &hub, &cancel).await;

    hub.remove_client(client_id).await;
    cancel.cancel();
    drop(client);

    if let Err(e) = outbound.await {
        debug!(
            target: "attendance.ws",
            client_id = %client_id,
            error = ?e,
            "Outbound pump panicked"
        );
    }

    info!(target: "attendance.ws", client_id = %client_id, "Client disconnected");
}

async fn inbound_pump<S, E>(
    mut stream: S,
    client: &ClientHandle,
    hub: &SubscriberHub,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display + Send,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => handle_control_frame(&text, client, hub).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(
                    target: "attendance.ws",
                    client_id = %client.id(),
                    error = %e,
                    "Socket read failed"
                );
                break;
            }
        }
    }
}

async fn handle_control_frame(text: &str, client: &ClientHandle, hub: &SubscriberHub) {
    match serde_json::from_str::<ControlFrame>(text) {
        Ok(ControlFrame {
            action: ControlAction::Subscribe,
            lecture_id,
        }) => hub.subscribe(client, lecture_id).await,
        Ok(ControlFrame {
            action: ControlAction::Unsubscribe,
            lecture_id,
        }) => hub.unsubscribe(client.id(), lecture_id).await,
        Err(e) => {
            debug!(
                target: "attendance.ws",
                client_id = %client.id(),
                error = %e,
                "Ignoring malformed control frame"
            );
        }
    }
}

async fn outbound_pump<K>(
    mut sink: K,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    client_id: ClientId,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display + Send,
{
    loop {
        let text = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = outbound_rx.recv() => match next {
                Some(text) => text,
                None => break,
            },
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(
                target: "attendance.ws",
                client_id = %client_id,
                error = %e,
                "Socket write failed"
            );
            break;
        }
    }

    cancel.cancel();
    if let Err(e) = sink.close().await {
        debug!(target: "attendance.ws", client_id = %client_id, error = %e, "Socket close failed");
    }
}
