use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ephemeral handle for one live WebSocket. Never persisted.
pub type ConnectionId = Uuid;

/// Emoji -> participants who reacted with it, in reaction order.
pub type ReactionSnapshot = BTreeMap<String, Vec<Participant>>;

const MAX_PROFILE_FIELD_CHARS: usize = 64;
const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub initials: String,
    #[serde(alias = "color")]
    pub color_token: String,
}

impl Avatar {
    /// Derive an avatar from a display name: up to two initials and a hue
    /// picked from the sum of the name's code points.
    pub fn derive(name: &str) -> Self {
        let mut initials: String = name
            .split(' ')
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();
        if initials.is_empty() {
            initials.push('A');
        }

        let hue = name.chars().map(|c| c as u32).sum::<u32>() % 360;

        Self {
            initials,
            color_token: format!("hsl({hue} 60% 45%)"),
        }
    }
}

/// Display identity a connection claims at join time. Not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub group: String,
    pub avatar: Avatar,
}

impl Profile {
    /// Build a profile from raw join fields, filling in defaults.
    pub fn from_claim(name: Option<&str>, group: Option<&str>, avatar: Option<Avatar>) -> Self {
        let name = clamp(name.unwrap_or_default());
        let name = if name.is_empty() {
            ANONYMOUS.to_string()
        } else {
            name
        };
        let group = clamp(group.unwrap_or_default());
        let avatar = avatar.unwrap_or_else(|| Avatar::derive(&name));

        Self {
            name,
            group,
            avatar,
        }
    }

    /// Profile used for connections that never joined.
    pub fn anonymous() -> Self {
        Self::from_claim(None, None, None)
    }
}

fn clamp(raw: &str) -> String {
    raw.trim().chars().take(MAX_PROFILE_FIELD_CHARS).collect()
}

/// A connection identity together with the profile it had when captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    #[serde(flatten)]
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(alias = "mime")]
    pub mime_type: String,
    #[serde(default)]
    pub original_name: String,
}

/// A chat message as broadcast to clients and returned in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Live connection that created the message. `None` for records loaded
    /// back from the store.
    pub author_id: Option<ConnectionId>,
    pub author: Profile,
    pub text: String,
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub reactions: ReactionSnapshot,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_derivation() {
        let avatar = Avatar::derive("ann marie lee");
        assert_eq!(avatar.initials, "AM");

        let hue = "ann marie lee".chars().map(|c| c as u32).sum::<u32>() % 360;
        assert_eq!(avatar.color_token, format!("hsl({hue} 60% 45%)"));

        assert_eq!(Avatar::derive("").initials, "A");
    }

    #[test]
    fn test_profile_defaults() {
        let anon = Profile::from_claim(Some("   "), None, None);
        assert_eq!(anon.name, "Anonymous");
        assert_eq!(anon.group, "");
        assert_eq!(anon.avatar.initials, "A");

        let long = "x".repeat(100);
        let clamped = Profile::from_claim(Some(&long), Some(&long), None);
        assert_eq!(clamped.name.chars().count(), 64);
        assert_eq!(clamped.group.chars().count(), 64);
    }

    #[test]
    fn test_participant_is_flat_on_the_wire() {
        let participant = Participant {
            id: Uuid::nil(),
            profile: Profile::from_claim(Some("Ann"), Some("ops"), None),
        };
        let json = serde_json::to_value(&participant).unwrap();
        assert_eq!(json["name"], "Ann");
        assert_eq!(json["group"], "ops");
        assert_eq!(json["avatar"]["initials"], "A");
        assert!(json["avatar"]["colorToken"].is_string());

        let back: Participant = serde_json::from_value(json).unwrap();
        assert_eq!(back, participant);
    }

    #[test]
    fn test_legacy_field_aliases() {
        let avatar: Avatar =
            serde_json::from_str(r#"{"initials":"AB","color":"hsl(10 60% 45%)"}"#).unwrap();
        assert_eq!(avatar.color_token, "hsl(10 60% 45%)");

        let attachment: Attachment =
            serde_json::from_str(r#"{"url":"/uploads/a.png","mime":"image/png"}"#).unwrap();
        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.original_name, "");
    }
}
