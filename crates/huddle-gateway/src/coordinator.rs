use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use huddle_db::MessageStore;
use huddle_types::api::ErrorKind;
use huddle_types::events::ServerEvent;
use huddle_types::models::{
    Attachment, Avatar, ChatMessage, ConnectionId, Participant, Profile, ReactionSnapshot,
};

use crate::dispatcher::Dispatcher;
use crate::presence::PresenceRegistry;
use crate::rate_limit::RateLimiter;
use crate::reactions::ReactionTable;
use crate::record;
use crate::seen::SeenTracker;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub max_text_len: usize,
    pub rate_window: Duration,
    pub rate_max: u32,
    pub default_history: u32,
    pub max_history: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_text_len: 5000,
            rate_window: Duration::from_millis(8000),
            rate_max: 5,
            default_history: 200,
            max_history: 1000,
        }
    }
}

/// Why a `message` command was refused. Reported to the sender only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("message has no text and no attachment")]
    Empty,

    #[error("message text exceeds {max} characters")]
    TooLong { max: usize },

    #[error("too many messages, slow down")]
    RateLimited,
}

impl Rejection {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Rejection::Empty => ErrorKind::Empty,
            Rejection::TooLong { .. } => ErrorKind::TooLong,
            Rejection::RateLimited => ErrorKind::RateLimited,
        }
    }

    pub fn max_length(&self) -> Option<usize> {
        match self {
            Rejection::TooLong { max } => Some(*max),
            _ => None,
        }
    }
}

/// Client payload of a `message` command.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub client_correlation_id: Option<String>,
}

/// A message removed by retention, with the upload it may leave behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Expired {
    pub id: String,
    pub attachment: Option<Attachment>,
}

/// What the coordinator remembers about every message it has accepted or
/// loaded, independent of whether the store still holds it.
#[derive(Debug, Clone)]
pub(crate) struct Tracked {
    created_at: i64,
    attachment: Option<Attachment>,
    persisted: bool,
}

/// Session-wide chat state. Every mutation happens under one lock so that
/// validate, persist and broadcast for a message never interleave with
/// another event, the retention sweep included.
pub(crate) struct ChatState {
    pub(crate) presence: PresenceRegistry,
    pub(crate) seen: SeenTracker,
    pub(crate) reactions: ReactionTable,
    pub(crate) limiter: RateLimiter,
    pub(crate) tracked: HashMap<String, Tracked>,
}

/// Orchestrates joins, messages, reactions and receipts for the room.
///
/// Persistence is best effort: a failed write is logged as a storage error
/// and the live session carries on from memory.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    dispatcher: Dispatcher,
    store: Arc<dyn MessageStore>,
    config: ChatConfig,
    state: Mutex<ChatState>,
}

impl Coordinator {
    pub fn new(dispatcher: Dispatcher, store: Arc<dyn MessageStore>, config: ChatConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_window, config.rate_max);
        Self {
            inner: Arc::new(CoordinatorInner {
                dispatcher,
                store,
                config,
                state: Mutex::new(ChatState {
                    presence: PresenceRegistry::new(),
                    seen: SeenTracker::new(),
                    reactions: ReactionTable::new(),
                    limiter,
                    tracked: HashMap::new(),
                }),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, ChatState> {
        self.inner.state.lock().await
    }

    /// Run a blocking store operation off the async runtime.
    pub(crate) async fn run_store<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&dyn MessageStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| anyhow::anyhow!("store task failed: {}", e))?
    }

    // -- Presence --

    /// Register the connection's profile and announce it. Returns false if
    /// the connection had already joined.
    pub async fn join(
        &self,
        conn_id: ConnectionId,
        name: Option<&str>,
        group: Option<&str>,
        avatar: Option<Avatar>,
    ) -> bool {
        let profile = Profile::from_claim(name, group, avatar);
        let mut state = self.lock_state().await;

        let Some(participant) = state.presence.join(conn_id, profile) else {
            warn!("{} tried to join twice, ignoring", conn_id);
            return false;
        };
        info!("{} joined as {}", conn_id, participant.profile.name);

        let list = state.presence.roster();
        self.inner
            .dispatcher
            .broadcast(&ServerEvent::UserJoined(participant));
        self.inner.dispatcher.broadcast(&ServerEvent::Userlist {
            count: list.len(),
            list,
        });
        true
    }

    /// Drop the connection's presence and rate-limit window. Seen and reaction
    /// memberships stay with the messages.
    pub async fn leave(&self, conn_id: ConnectionId) {
        let mut state = self.lock_state().await;
        state.limiter.forget(conn_id);

        let Some(participant) = state.presence.leave(conn_id) else {
            return;
        };
        info!("{} ({}) left", participant.profile.name, conn_id);

        let list = state.presence.roster();
        self.inner
            .dispatcher
            .broadcast(&ServerEvent::UserLeft(participant));
        self.inner.dispatcher.broadcast(&ServerEvent::Userlist {
            count: list.len(),
            list,
        });
    }

    pub async fn roster(&self) -> Vec<Participant> {
        self.lock_state().await.presence.roster()
    }

    /// Relay a typing indicator to everyone else. Ignored before join.
    pub async fn typing(&self, conn_id: ConnectionId, is_typing: bool) {
        let state = self.lock_state().await;
        let Some(profile) = state.presence.profile(conn_id) else {
            return;
        };
        self.inner.dispatcher.broadcast_except(
            conn_id,
            &ServerEvent::Typing {
                id: conn_id,
                profile: profile.clone(),
                is_typing,
            },
        );
    }

    // -- Messages --

    /// Validate, rate-limit, persist and broadcast a message. Returns the new
    /// message id.
    ///
    /// Broadcasts `message` (with the client's correlation id echoed) and
    /// then the initial `seen-update` to every connection, the sender
    /// included.
    pub async fn submit(
        &self,
        conn_id: ConnectionId,
        submission: Submission,
    ) -> Result<String, Rejection> {
        let text = submission.text.trim();
        let attachment = submission
            .attachment
            .filter(|a| !a.url.trim().is_empty());

        if text.is_empty() && attachment.is_none() {
            return Err(Rejection::Empty);
        }
        let max = self.inner.config.max_text_len;
        if text.chars().count() > max {
            return Err(Rejection::TooLong { max });
        }

        let mut state = self.lock_state().await;
        if !state.limiter.allow(conn_id) {
            debug!("{} rate limited", conn_id);
            return Err(Rejection::RateLimited);
        }

        let now = Utc::now();
        let author = state.presence.participant(conn_id);
        let message = ChatMessage {
            id: new_message_id(now),
            author_id: Some(conn_id),
            author: author.profile.clone(),
            text: text.to_string(),
            attachment,
            reactions: ReactionSnapshot::new(),
            created_at: now,
            client_correlation_id: submission.client_correlation_id,
        };

        let persisted = self.persist_insert(&message).await;
        state.tracked.insert(
            message.id.clone(),
            Tracked {
                created_at: message.created_at.timestamp_millis(),
                attachment: message.attachment.clone(),
                persisted,
            },
        );

        let seen = state.seen.start(&message.id, author);
        let message_id = message.id.clone();
        debug!("{} sent message {}", conn_id, message_id);

        self.inner.dispatcher.broadcast(&ServerEvent::Message(message));
        self.inner.dispatcher.broadcast(&ServerEvent::SeenUpdate {
            message_id: message_id.clone(),
            seen,
        });

        Ok(message_id)
    }

    /// True if the store accepted the row.
    async fn persist_insert(&self, message: &ChatMessage) -> bool {
        let row = match record::to_row(message) {
            Ok(row) => row,
            Err(e) => {
                error!("Failed to encode message {}: {}", message.id, e);
                return false;
            }
        };
        let id = row.id.clone();
        match self.run_store(move |store| store.insert_message(&row)).await {
            Ok(()) => true,
            Err(e) => {
                // Live chat keeps going without durability
                warn!(error_kind = ?ErrorKind::StorageError, "Failed to persist message {}: {}", id, e);
                false
            }
        }
    }

    // -- Reactions and receipts --

    /// Toggle a reaction and broadcast the message's new reaction snapshot.
    /// Returns `None` (and broadcasts nothing) for missing fields or an
    /// unknown message.
    pub async fn toggle_reaction(
        &self,
        conn_id: ConnectionId,
        message_id: Option<&str>,
        emoji: Option<&str>,
    ) -> Option<ReactionSnapshot> {
        let message_id = message_id.filter(|id| !id.is_empty())?;
        let emoji = emoji.filter(|e| !e.is_empty())?;

        let mut state = self.lock_state().await;
        if !self.ensure_tracked(&mut state, message_id).await {
            return None;
        }

        let reactor = state.presence.participant(conn_id);
        let reactions = state.reactions.toggle(message_id, reactor, emoji);

        match serde_json::to_string(&reactions) {
            Ok(json) => {
                let id = message_id.to_string();
                let result = self
                    .run_store(move |store| store.update_reactions(&id, &json))
                    .await;
                if let Err(e) = result {
                    warn!(error_kind = ?ErrorKind::StorageError, "Failed to persist reactions for {}: {}", message_id, e);
                }
            }
            Err(e) => error!("Failed to encode reactions for {}: {}", message_id, e),
        }

        self.inner.dispatcher.broadcast(&ServerEvent::ReactionUpdate {
            message_id: message_id.to_string(),
            reactions: reactions.clone(),
        });
        Some(reactions)
    }

    /// Record that `conn_id` has seen a message and broadcast the full seen
    /// list to everyone.
    pub async fn mark_seen(
        &self,
        conn_id: ConnectionId,
        message_id: Option<&str>,
    ) -> Option<Vec<Participant>> {
        let message_id = message_id.filter(|id| !id.is_empty())?;

        let mut state = self.lock_state().await;
        if !self.ensure_tracked(&mut state, message_id).await {
            return None;
        }

        let viewer = state.presence.participant(conn_id);
        let seen = state.seen.mark(message_id, viewer);

        self.inner.dispatcher.broadcast(&ServerEvent::SeenUpdate {
            message_id: message_id.to_string(),
            seen: seen.clone(),
        });
        Some(seen)
    }

    /// Make sure a message id is tracked in memory, loading it from the store
    /// if this session never saw it. False if the message does not exist.
    async fn ensure_tracked(&self, state: &mut ChatState, message_id: &str) -> bool {
        if state.seen.contains(message_id) {
            return true;
        }

        let id = message_id.to_string();
        match self.run_store(move |store| store.get_message(&id)).await {
            Ok(Some(row)) => {
                let message = record::from_row(row);
                state
                    .tracked
                    .entry(message.id.clone())
                    .or_insert_with(|| Tracked {
                        created_at: message.created_at.timestamp_millis(),
                        attachment: message.attachment.clone(),
                        persisted: true,
                    });
                state.reactions.hydrate(&message.id, message.reactions);
                state.seen.hydrate(&message.id);
                true
            }
            Ok(None) => {
                debug!("Ignoring event for unknown message {}", message_id);
                false
            }
            Err(e) => {
                warn!(error_kind = ?ErrorKind::StorageError, "Failed to look up message {}: {}", message_id, e);
                false
            }
        }
    }

    // -- Queries --

    /// The most recent `limit` records, oldest first. A missing or zero
    /// limit means the default.
    pub async fn history(&self, limit: Option<u32>) -> anyhow::Result<Vec<ChatMessage>> {
        let config = &self.inner.config;
        let limit = limit
            .filter(|&l| l > 0)
            .unwrap_or(config.default_history)
            .clamp(1, config.max_history);

        let rows = self.run_store(move |store| store.recent_messages(limit)).await?;
        Ok(rows.into_iter().map(record::from_row).collect())
    }

    pub async fn message(&self, id: &str) -> anyhow::Result<Option<ChatMessage>> {
        let id = id.to_string();
        let row = self.run_store(move |store| store.get_message(&id)).await?;
        Ok(row.map(record::from_row))
    }

    // -- Retention --

    /// Delete every message created before `cutoff`, purge its in-memory
    /// state and broadcast one `message-delete`.
    ///
    /// Besides the rows the store deletes (or evicted on its own), messages
    /// this process accepted but never managed to persist expire on the same
    /// clock. If the store itself fails, only those unpersisted messages are
    /// expired and the store error is logged.
    pub async fn expire_before(&self, cutoff: DateTime<Utc>) -> Vec<Expired> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut state = self.lock_state().await;

        let mut expired = Vec::new();
        let store_ok = match self
            .run_store(move |store| store.delete_older_than(cutoff_ms))
            .await
        {
            Ok(rows) => {
                for row in rows {
                    state.tracked.remove(&row.id);
                    let attachment = record::attachment_of(&row);
                    expired.push(Expired {
                        id: row.id,
                        attachment,
                    });
                }
                true
            }
            Err(e) => {
                warn!(error_kind = ?ErrorKind::StorageError, "Failed to delete expired messages: {}", e);
                false
            }
        };
        // Persisted rows the store could not delete must stay visible
        expired.extend(take_tracked_before(&mut state.tracked, cutoff_ms, !store_ok));

        if expired.is_empty() {
            return expired;
        }

        let ids: Vec<String> = expired.iter().map(|e| e.id.clone()).collect();
        state.seen.purge(&ids);
        state.reactions.purge(&ids);
        drop(state);

        self.inner
            .dispatcher
            .broadcast(&ServerEvent::MessageDelete { ids });
        expired
    }
}

/// Remove and return tracked messages created before `cutoff_ms`, oldest
/// first.
fn take_tracked_before(
    tracked: &mut HashMap<String, Tracked>,
    cutoff_ms: i64,
    unpersisted_only: bool,
) -> Vec<Expired> {
    let mut stale: Vec<(i64, String)> = tracked
        .iter()
        .filter(|(_, t)| t.created_at < cutoff_ms && !(unpersisted_only && t.persisted))
        .map(|(id, t)| (t.created_at, id.clone()))
        .collect();
    stale.sort();

    stale
        .into_iter()
        .filter_map(|(_, id)| {
            let entry = tracked.remove(&id)?;
            Some(Expired {
                id,
                attachment: entry.attachment,
            })
        })
        .collect()
}

/// Base-36 millisecond timestamp plus 64 random bits.
fn new_message_id(now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis().max(0) as u64;
    let suffix: u64 = rand::rng().random();
    format!("{}-{:016x}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
