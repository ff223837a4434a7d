//! Device WebSocket listener.
//!
//! Devices dial the root path. Each accepted socket becomes one
//! session task: a read loop feeding the state machine and a write
//! loop draining the session's outbound channel. A closed connection
//! cancels in-flight writes and unbinds itself from the connection
//! map.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connections::next_session_seq;
use crate::session::{Session, SessionDeps};

pub fn ws_router(deps: SessionDeps) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(deps)
}

async fn ws_upgrade(
    State(deps): State<SessionDeps>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| run_session(socket, deps, remote.to_string()))
}

async fn run_session(socket: WebSocket, deps: SessionDeps, remote: String) {
    tracing::info!(%remote, "device connected");

    let idle_timeout = deps.config.session_idle_timeout;
    let (outbound_tx, mut outbound_rx) = mpsc::channel(deps.config.outbound_queue);
    let cancel = CancellationToken::new();
    let seq = next_session_seq();
    let mut session = Session::new(deps, remote.clone(), outbound_tx.clone(), cancel.clone(), seq);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write loop: serializes all outbound frames for this session.
    let write_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                write_cancel.cancel();
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let _ = outbound_tx.try_send(Session::welcome());

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, ws_rx.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::debug!(%remote, "session idle deadline reached");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let response = session.handle_text(text.as_str()).await;
                if outbound_tx.try_send(response).is_err() {
                    // Back-pressure policy: a full outbound queue drops
                    // the session rather than buffering unboundedly.
                    tracing::warn!(%remote, "outbound queue full, dropping session");
                    break;
                }
            }
            Message::Close(_) => break,
            // Protocol-level ping/pong is answered by the socket layer.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    session.close().await;
    cancel.cancel();
    drop(outbound_tx);
    let _ = writer.await;
    tracing::info!(%remote, "device disconnected");
}
