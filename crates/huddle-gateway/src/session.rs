use tracing::{debug, warn};

use huddle_types::api::ErrorKind;
use huddle_types::events::{ClientCommand, ServerEvent};
use huddle_types::models::ConnectionId;

use crate::coordinator::{Coordinator, Rejection, Submission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket is open, no profile yet
    Connected,
    /// Profile registered with presence
    Joined,
    /// Terminal. Presence and rate-limit state are gone
    Disconnected,
}

/// One client's view of the room for the lifetime of its socket.
///
/// Commands are handled one at a time in arrival order. There is no resume:
/// a reconnect is a new session with a new identity.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    coordinator: Coordinator,
}

impl Session {
    pub fn new(id: ConnectionId, coordinator: Coordinator) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            coordinator,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn handle(&mut self, cmd: ClientCommand) {
        if self.state == SessionState::Disconnected {
            return;
        }

        match cmd {
            ClientCommand::Join {
                name,
                group,
                avatar,
            } => {
                if self.state == SessionState::Joined {
                    warn!("{} sent a second join, ignoring", self.id);
                    return;
                }
                if self
                    .coordinator
                    .join(self.id, name.as_deref(), group.as_deref(), avatar)
                    .await
                {
                    self.state = SessionState::Joined;
                }
            }

            ClientCommand::Message {
                text,
                attachment,
                client_correlation_id,
                ack_id,
            } => {
                let submission = Submission {
                    text,
                    attachment,
                    client_correlation_id,
                };
                let result = self.coordinator.submit(self.id, submission).await;
                self.report(result, ack_id).await;
            }

            ClientCommand::React { message_id, emoji } => {
                self.coordinator
                    .toggle_reaction(self.id, message_id.as_deref(), emoji.as_deref())
                    .await;
            }

            ClientCommand::Seen { message_id } => {
                self.coordinator
                    .mark_seen(self.id, message_id.as_deref())
                    .await;
            }

            ClientCommand::Typing { is_typing } => {
                self.coordinator.typing(self.id, is_typing).await;
            }

            ClientCommand::RequestHistory { limit } => {
                let event = match self.coordinator.history(limit).await {
                    Ok(messages) => ServerEvent::History(messages),
                    Err(e) => {
                        warn!("History query failed for {}: {}", self.id, e);
                        ServerEvent::HistoryError {
                            error_kind: ErrorKind::StorageError,
                        }
                    }
                };
                self.send(event).await;
            }

            ClientCommand::RequestMessage { id } => match self.coordinator.message(&id).await {
                Ok(Some(message)) => self.send(ServerEvent::Message(message)).await,
                Ok(None) => debug!("{} requested unknown message {}", self.id, id),
                Err(e) => warn!("Message lookup failed for {}: {}", id, e),
            },
        }
    }

    /// Tell the sender how its message went: an `ack` if it asked for one,
    /// otherwise a `message-error` on rejection only.
    async fn report(&self, result: Result<String, Rejection>, ack_id: Option<u64>) {
        let event = match (ack_id, result) {
            (Some(ack_id), Ok(message_id)) => ServerEvent::Ack {
                ack_id,
                accepted: true,
                message_id: Some(message_id),
                error_kind: None,
                max_length: None,
            },
            (Some(ack_id), Err(rejection)) => ServerEvent::Ack {
                ack_id,
                accepted: false,
                message_id: None,
                error_kind: Some(rejection.error_kind()),
                max_length: rejection.max_length(),
            },
            (None, Ok(_)) => return,
            (None, Err(rejection)) => ServerEvent::MessageError {
                error_kind: rejection.error_kind(),
                max_length: rejection.max_length(),
            },
        };
        self.send(event).await;
    }

    async fn send(&self, event: ServerEvent) {
        self.coordinator.dispatcher().send_to(self.id, event).await;
    }

    /// Tear down presence. Message history is untouched.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.coordinator.leave(self.id).await;
        self.state = SessionState::Disconnected;
    }
}
