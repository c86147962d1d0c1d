use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use horde_room_server::config::ServerConfig;
use horde_room_server::entities::PlayerId;
use horde_room_server::error::{CommandError, ServerError};
use horde_room_server::protocol::{
    error_message, normalize_room_id, parse_client_message, sanitize_name, ClientMessage,
};
use horde_room_server::registry::RoomRegistry;
use horde_room_server::scheduler::{OutboundMessage, RoomHandle};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const OUTBOUND_CAPACITY: usize = 256;

type SharedRegistry = Arc<Mutex<RoomRegistry>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run(ServerConfig::parse()).await {
        error!(%err, "server stopped");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let room_config = config.room_config()?;
    info!(
        level = ?room_config.level_type,
        tick_rate = config.tick_rate,
        max_players = room_config.max_players,
        debug_commands = room_config.debug_commands,
        "room defaults"
    );
    let registry: SharedRegistry = Arc::new(Mutex::new(RoomRegistry::new(room_config)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/rooms", get(rooms_handler))
        .route("/ws", get(ws_handler))
        .with_state(registry.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.lock().await.shutdown_all();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn rooms_handler(State(registry): State<SharedRegistry>) -> impl IntoResponse {
    let mut guard = registry.lock().await;
    guard.prune();
    Json(guard.summaries())
}

async fn ws_handler(ws: WebSocketUpgrade, State(registry): State<SharedRegistry>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(registry, socket))
}

async fn handle_socket(registry: SharedRegistry, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => ws_sender.send(Message::Text(payload.into())).await,
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let mut session: Option<(RoomHandle, PlayerId)> = None;

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };
        let raw = match message {
            Message::Text(raw) => raw.to_string(),
            Message::Binary(raw) => match String::from_utf8(raw.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    reply(&tx, error_message("invalid utf8 message"));
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        let Some(parsed) = parse_client_message(&raw) else {
            reply(&tx, error_message("invalid message"));
            continue;
        };

        if session.is_none() {
            match parsed {
                ClientMessage::Hello { name, room_id } => {
                    let Some(room_id) = normalize_room_id(room_id.as_deref()) else {
                        reply(&tx, error_message("invalid room id"));
                        continue;
                    };
                    match join_room(&registry, &room_id, sanitize_name(&name), tx.clone()).await {
                        Ok(joined) => session = Some(joined),
                        Err(err) => {
                            debug!(room = %room_id, %err, "join refused");
                            reply(&tx, error_message(&err.to_string()));
                        }
                    }
                }
                _ => reply(&tx, error_message("send hello first")),
            }
            continue;
        }
        let Some((handle, player)) = &session else {
            continue;
        };
        if matches!(parsed, ClientMessage::Hello { .. }) {
            reply(&tx, error_message("already joined"));
            continue;
        }
        if let Err(err) = handle.send(*player, parsed) {
            if err == CommandError::RoomClosed {
                break;
            }
            reply(&tx, error_message(&err.to_string()));
        }
    }

    if let Some((handle, player)) = session {
        handle.leave(player).await;
        debug!(room = %handle.id(), %player, "socket closed");
    }
    drop(tx);
    let _ = writer.await;
}

/// Joins `room_id`, replacing a room that closed between lookup and join.
async fn join_room(
    registry: &SharedRegistry,
    room_id: &str,
    name: String,
    tx: mpsc::Sender<OutboundMessage>,
) -> Result<(RoomHandle, PlayerId), CommandError> {
    for _ in 0..2 {
        let handle = registry.lock().await.get_or_create(room_id);
        match handle.join(name.clone(), tx.clone()).await {
            Ok(player) => {
                info!(room = %room_id, %player, %name, "player joined");
                return Ok((handle, player));
            }
            Err(CommandError::RoomClosed) => {
                handle.destroy();
                continue;
            }
            Err(err) => return Err(err),
        }
    }
    Err(CommandError::RoomClosed)
}

fn reply(tx: &mpsc::Sender<OutboundMessage>, payload: String) {
    if tx.try_send(OutboundMessage::Text(payload)).is_err() {
        debug!("reply dropped, socket queue full");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_room_server::config::RoomConfig;

    #[tokio::test(start_paused = true)]
    async fn join_room_reuses_a_live_room() {
        let registry: SharedRegistry = Arc::new(Mutex::new(
            RoomRegistry::new(RoomConfig::default()).with_fixed_seed(Some(5)),
        ));
        let (tx, _rx) = mpsc::channel(4096);
        let (first, _) = join_room(&registry, "alpha", "a".to_string(), tx.clone())
            .await
            .expect("first join");
        let (second, _) = join_room(&registry, "alpha", "b".to_string(), tx)
            .await
            .expect("second join");
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_room_replaces_a_destroyed_room() {
        let registry: SharedRegistry = Arc::new(Mutex::new(RoomRegistry::new(RoomConfig::default())));
        let stale = registry.lock().await.get_or_create("beta");
        stale.destroy();
        let (tx, _rx) = mpsc::channel(4096);
        let (fresh, _) = join_room(&registry, "beta", "c".to_string(), tx)
            .await
            .expect("joined a fresh room");
        assert!(!fresh.is_destroyed());
    }

    #[test]
    fn reply_drops_when_the_socket_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        reply(&tx, "one".to_string());
        reply(&tx, "two".to_string());
        assert_eq!(rx.try_recv().ok(), Some(OutboundMessage::Text("one".to_string())));
        assert!(rx.try_recv().is_err());
    }
}
