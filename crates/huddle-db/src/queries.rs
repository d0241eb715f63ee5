use anyhow::Result;
use rusqlite::{Connection, Row};

use crate::models::MessageRow;
use crate::{Database, MessageStore};

const MESSAGE_COLUMNS: &str = "id, name, group_name, avatar, text, attachment, reactions, created_at";

impl MessageStore for Database {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, name, group_name, avatar, text, attachment, reactions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.group_name,
                    row.avatar,
                    row.text,
                    row.attachment,
                    row.reactions,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn update_reactions(&self, id: &str, reactions: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET reactions = ?1 WHERE id = ?2",
                rusqlite::params![reactions, id],
            )?;
            Ok(changed > 0)
        })
    }

    fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent(conn, limit))
    }

    fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_message).optional()?;
            Ok(row)
        })
    }

    fn delete_older_than(&self, cutoff_ms: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let expired = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE created_at < ?1 ORDER BY created_at"
                ))?;
                stmt.query_map([cutoff_ms], map_message)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            if !expired.is_empty() {
                tx.execute("DELETE FROM messages WHERE created_at < ?1", [cutoff_ms])?;
            }
            tx.commit()?;

            Ok(expired)
        })
    }
}

fn query_recent(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1"
    ))?;

    let mut rows = stmt
        .query_map([limit], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Newest-first from SQL, callers want chronological order
    rows.reverse();
    Ok(rows)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        name: row.get(1)?,
        group_name: row.get(2)?,
        avatar: row.get(3)?,
        text: row.get(4)?,
        attachment: row.get(5)?,
        reactions: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
