//! Conversion between live `ChatMessage`s and persisted `MessageRow`s.

use chrono::DateTime;
use tracing::warn;

use huddle_db::MessageRow;
use huddle_types::models::{Attachment, Avatar, ChatMessage, Profile, ReactionSnapshot};

pub fn to_row(message: &ChatMessage) -> anyhow::Result<MessageRow> {
    Ok(MessageRow {
        id: message.id.clone(),
        name: message.author.name.clone(),
        group_name: message.author.group.clone(),
        avatar: serde_json::to_string(&message.author.avatar)?,
        text: message.text.clone(),
        attachment: message
            .attachment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
        reactions: serde_json::to_string(&message.reactions)?,
        created_at: message.created_at.timestamp_millis(),
    })
}

/// Rebuild a message from its row. Corrupt JSON columns degrade to defaults
/// so one bad row does not hide the rest of the history.
pub fn from_row(row: MessageRow) -> ChatMessage {
    let avatar = serde_json::from_str::<Avatar>(&row.avatar).unwrap_or_else(|e| {
        warn!("Corrupt avatar on message '{}': {}", row.id, e);
        Avatar::derive(&row.name)
    });

    let attachment = attachment_of(&row);

    let reactions = serde_json::from_str::<ReactionSnapshot>(&row.reactions).unwrap_or_else(|e| {
        warn!("Corrupt reactions on message '{}': {}", row.id, e);
        ReactionSnapshot::new()
    });

    let created_at = DateTime::from_timestamp_millis(row.created_at).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on message '{}'", row.created_at, row.id);
        DateTime::default()
    });

    ChatMessage {
        id: row.id,
        author_id: None,
        author: Profile {
            name: row.name,
            group: row.group_name,
            avatar,
        },
        text: row.text,
        attachment,
        reactions,
        created_at,
        client_correlation_id: None,
    }
}

/// The row's attachment, if it has a readable one.
pub fn attachment_of(row: &MessageRow) -> Option<Attachment> {
    row.attachment.as_deref().and_then(|raw| {
        serde_json::from_str(raw)
            .map_err(|e| warn!("Corrupt attachment on message '{}': {}", row.id, e))
            .ok()
            .flatten()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use huddle_types::models::Participant;
    use uuid::Uuid;

    #[test]
    fn test_row_drops_live_only_fields() {
        let author = Profile::from_claim(Some("Ann"), Some("ops"), None);
        let mut reactions = ReactionSnapshot::new();
        reactions.insert(
            "👍".into(),
            vec![Participant {
                id: Uuid::new_v4(),
                profile: author.clone(),
            }],
        );
        let message = ChatMessage {
            id: "m1".into(),
            author_id: Some(Uuid::new_v4()),
            author: author.clone(),
            text: "hi".into(),
            attachment: Some(Attachment {
                url: "/uploads/1-abc.png".into(),
                mime_type: "image/png".into(),
                original_name: "cat.png".into(),
            }),
            reactions,
            created_at: DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap(),
            client_correlation_id: Some("tmp-1".into()),
        };

        let restored = from_row(to_row(&message).unwrap());
        assert_eq!(restored.author_id, None);
        assert_eq!(restored.client_correlation_id, None);
        assert_eq!(
            ChatMessage {
                author_id: message.author_id,
                client_correlation_id: message.client_correlation_id.clone(),
                ..restored
            },
            message
        );
    }

    #[test]
    fn test_corrupt_columns_degrade() {
        let row = MessageRow {
            id: "m1".into(),
            name: "Ann".into(),
            group_name: String::new(),
            avatar: "not json".into(),
            text: "hi".into(),
            attachment: Some("null".into()),
            reactions: "[".into(),
            created_at: 0,
        };

        let message = from_row(row);
        assert_eq!(message.author.avatar, Avatar::derive("Ann"));
        assert!(message.attachment.is_none());
        assert!(message.reactions.is_empty());
    }
}
