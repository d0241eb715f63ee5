use serde::{Deserialize, Serialize};

/// Persisted message row. Profile, attachment and reactions are stored as
/// JSON text so the DB layer stays independent of huddle-types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub name: String,
    pub group_name: String,
    pub avatar: String,
    pub text: String,
    pub attachment: Option<String>,
    pub reactions: String,
    /// Unix milliseconds.
    pub created_at: i64,
}
