use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_types::events::{ClientCommand, ServerEvent};
use huddle_types::models::ConnectionId;

use crate::coordinator::Coordinator;
use crate::dispatcher::{Dispatcher, Outbound};
use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Longest slice of a malformed frame echoed into the log.
const BAD_FRAME_LOG_CHARS: usize = 200;

/// Frames waiting for one connection: room broadcasts and its direct events.
pub struct Outbox {
    conn_id: ConnectionId,
    broadcast_rx: broadcast::Receiver<Outbound>,
    direct_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Outbox {
    /// Subscribe to the room and register the connection's direct channel.
    pub async fn open(dispatcher: &Dispatcher, conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            broadcast_rx: dispatcher.subscribe(),
            direct_rx: dispatcher.register(conn_id).await,
        }
    }

    /// The next frame to write, or `None` once either channel closes.
    ///
    /// Pending broadcasts always go first, so an `ack` never overtakes the
    /// `message` it acknowledges.
    pub async fn next(&mut self) -> Option<String> {
        let conn_id = self.conn_id;
        loop {
            tokio::select! {
                biased;

                result = self.broadcast_rx.recv() => {
                    match result {
                        Ok(out) if out.is_for(conn_id) => return Some(out.json.to_string()),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(n)) => {
                            warn!("{} broadcast receiver lagged by {} events", conn_id, n);
                            continue;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
                result = self.direct_rx.recv() => {
                    let event = result?;
                    match serde_json::to_string(&event) {
                        Ok(text) => return Some(text),
                        Err(e) => {
                            error!("Failed to serialize event for {}: {}", conn_id, e);
                            continue;
                        }
                    }
                }
            }
        }
    }
}

/// Drive one WebSocket connection until either side goes away.
pub async fn handle_connection(socket: WebSocket, coordinator: Coordinator) {
    let conn_id = Uuid::new_v4();
    let dispatcher = coordinator.dispatcher().clone();
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected", conn_id);

    // Subscribe before announcing ourselves so no room event is missed
    let mut outbox = Outbox::open(&dispatcher, conn_id).await;

    match serde_json::to_string(&ServerEvent::Ready { id: conn_id }) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                dispatcher.unregister(conn_id).await;
                return;
            }
        }
        Err(e) => error!("Failed to serialize ready event: {}", e),
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    // Forward broadcasts + direct events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbox.next() => {
                    let Some(text) = frame else {
                        break;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("{} heartbeat timeout (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Commands are handled inline so they are applied strictly in order
    let mut session = Session::new(conn_id, coordinator);
    let recv_loop = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => session.handle(cmd).await,
                    Err(e) => {
                        let raw: String = text.chars().take(BAD_FRAME_LOG_CHARS).collect();
                        warn!("{} bad command: {} -- raw: {}", conn_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_received.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        _ = recv_loop => {}
    }
    send_task.abort();

    session.disconnect().await;
    dispatcher.unregister(conn_id).await;
    info!("{} disconnected", conn_id);
}
