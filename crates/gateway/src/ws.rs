use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::extract::ws::{Message, WebSocket},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::state::GatewayState;

/// Drive one WebSocket from upgrade to teardown.
///
/// Frames queued by the hub are written in order from a single place, so the
/// hub never touches the socket. The connection is torn down when the peer
/// closes, the transport errors, or the hub cancels it (stale sweep).
pub async fn handle_connection(
    mut socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();
    let conn_id = state.hub.lock().await.connect(
        tx,
        cancel.clone(),
        Some(remote_addr.ip().to_canonical().to_string()),
        Instant::now(),
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "closing connection on request");
                let _ = socket.send(Message::Close(None)).await;
                break;
            },
            Some(text) = rx.recv() => {
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    debug!(conn_id = %conn_id, error = %e, "write failed");
                    break;
                }
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state
                        .hub
                        .lock()
                        .await
                        .handle_text(&conn_id, text.as_str(), Instant::now());
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    state.hub.lock().await.touch(&conn_id, Instant::now());
                },
                Some(Ok(Message::Binary(_))) => {
                    debug!(conn_id = %conn_id, "ignoring binary frame");
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, error = %e, "websocket read error");
                    break;
                },
            },
        }
    }

    state.hub.lock().await.disconnect(&conn_id);
}
