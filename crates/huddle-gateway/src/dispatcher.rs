use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::error;

use huddle_types::events::ServerEvent;
use huddle_types::models::ConnectionId;

/// A broadcast event, serialized once and shared by every receiver.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Connection that must not receive this event (typing relays).
    pub except: Option<ConnectionId>,
    pub json: Arc<str>,
}

impl Outbound {
    pub fn is_for(&self, conn_id: ConnectionId) -> bool {
        self.except != Some(conn_id)
    }
}

/// Fans events out to connected clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for room events. Every connection receives every event
    broadcast_tx: broadcast::Sender<Outbound>,

    /// Per-connection direct channels: acks, errors, history
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to room events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: &ServerEvent) {
        self.publish(None, event);
    }

    /// Broadcast an event to every client except `conn_id`.
    pub fn broadcast_except(&self, conn_id: ConnectionId, event: &ServerEvent) {
        self.publish(Some(conn_id), event);
    }

    fn publish(&self, except: Option<ConnectionId>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                // No receivers is fine: nobody is connected
                let _ = self.inner.broadcast_tx.send(Outbound {
                    except,
                    json: json.into(),
                });
            }
            Err(e) => error!("Failed to serialize broadcast event: {}", e),
        }
    }

    /// Register a direct channel for a connection.
    pub async fn register(&self, conn_id: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        rx
    }

    pub async fn unregister(&self, conn_id: ConnectionId) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Send an event to one connection only.
    pub async fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(tx) = connections.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let conn = Uuid::new_v4();

        dispatcher.broadcast_except(conn, &ServerEvent::MessageDelete { ids: vec!["m".into()] });

        let out = rx.try_recv().unwrap();
        assert!(!out.is_for(conn));
        assert!(out.is_for(Uuid::new_v4()));
        let event: ServerEvent = serde_json::from_str(&out.json).unwrap();
        assert_eq!(event, ServerEvent::MessageDelete { ids: vec!["m".into()] });
    }

    #[tokio::test]
    async fn test_direct_channel() {
        let dispatcher = Dispatcher::new();
        let conn = Uuid::new_v4();
        let mut rx = dispatcher.register(conn).await;
        assert_eq!(dispatcher.connection_count().await, 1);

        dispatcher.send_to(conn, ServerEvent::Ready { id: conn }).await;
        assert_eq!(rx.recv().await, Some(ServerEvent::Ready { id: conn }));

        dispatcher.unregister(conn).await;
        assert_eq!(dispatcher.connection_count().await, 0);
        // Sending to a gone connection is a no-op
        dispatcher.send_to(conn, ServerEvent::Ready { id: conn }).await;
    }
}
