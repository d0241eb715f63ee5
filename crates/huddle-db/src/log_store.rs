use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::MessageStore;
use crate::models::MessageRow;

/// One line of the log file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Insert { row: MessageRow },
    Reactions { id: String, reactions: String },
    Delete { ids: Vec<String> },
}

/// Flat append-only JSON-lines message store.
///
/// Every mutation is appended as one line and applied to an in-memory copy of
/// the live rows. The file is rewritten with only the live rows once the
/// superseded lines outnumber them. At most `max_records` newest rows are
/// kept; rows evicted past that cap are handed back by the next
/// `delete_older_than` so their owners can clean up after them.
pub struct LogStore {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

struct LogInner {
    rows: Vec<MessageRow>,
    /// Rows dropped by the record cap, not yet reported
    evicted: Vec<MessageRow>,
    file: File,
    lines: usize,
    max_records: usize,
}

impl LogStore {
    pub fn open(path: &Path, max_records: usize) -> Result<Self> {
        let mut rows = Vec::new();
        let mut lines = 0;

        if path.exists() {
            let reader = BufReader::new(
                File::open(path).with_context(|| format!("opening {}", path.display()))?,
            );
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                lines += 1;
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(entry) => apply(&mut rows, entry),
                    Err(e) => warn!("{}:{}: skipping corrupt log line: {}", path.display(), lineno + 1, e),
                }
            }
        }

        let file = open_append(path)?;
        let mut inner = LogInner {
            rows,
            evicted: Vec::new(),
            file,
            lines,
            max_records: max_records.max(1),
        };
        inner.trim();
        if inner.needs_compaction() {
            inner.compact(path)?;
        }

        info!(
            "Log store opened at {} ({} messages)",
            path.display(),
            inner.rows.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    fn with_inner<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LogInner, &Path) -> Result<T>,
    {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Log store lock poisoned: {}", e))?;
        f(&mut inner, &self.path)
    }
}

impl LogInner {
    /// Append the entry to disk, then apply it to the live rows. Nothing is
    /// applied if the write fails.
    fn commit(&mut self, entry: LogEntry, path: &Path) -> Result<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.lines += 1;

        apply(&mut self.rows, entry);
        self.trim();

        if self.needs_compaction() {
            self.compact(path)?;
        }
        Ok(())
    }

    fn trim(&mut self) {
        if self.rows.len() > self.max_records {
            let excess = self.rows.len() - self.max_records;
            let dropped: Vec<MessageRow> = self.rows.drain(..excess).collect();
            debug!("Log store at capacity, evicting {} oldest messages", dropped.len());
            self.evicted.extend(dropped);
        }
    }

    fn needs_compaction(&self) -> bool {
        self.lines > self.rows.len() * 2 + 16
    }

    /// Rewrite the log with one insert per live row, then swap it in.
    fn compact(&mut self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("compact");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for row in &self.rows {
                serde_json::to_writer(&mut writer, &LogEntry::Insert { row: row.clone() })?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;

        self.file = open_append(path)?;
        self.lines = self.rows.len();
        Ok(())
    }
}

fn apply(rows: &mut Vec<MessageRow>, entry: LogEntry) {
    match entry {
        LogEntry::Insert { row } => {
            rows.retain(|r| r.id != row.id);
            rows.push(row);
        }
        LogEntry::Reactions { id, reactions } => {
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.reactions = reactions;
            }
        }
        LogEntry::Delete { ids } => rows.retain(|r| !ids.contains(&r.id)),
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))
}

impl MessageStore for LogStore {
    fn backend(&self) -> &'static str {
        "log"
    }

    fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_inner(|inner, path| {
            inner.commit(LogEntry::Insert { row: row.clone() }, path)
        })
    }

    fn update_reactions(&self, id: &str, reactions: &str) -> Result<bool> {
        self.with_inner(|inner, path| {
            if !inner.rows.iter().any(|r| r.id == id) {
                return Ok(false);
            }
            inner.commit(
                LogEntry::Reactions {
                    id: id.to_string(),
                    reactions: reactions.to_string(),
                },
                path,
            )?;
            Ok(true)
        })
    }

    fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_inner(|inner, _| {
            let skip = inner.rows.len().saturating_sub(limit as usize);
            Ok(inner.rows[skip..].to_vec())
        })
    }

    fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_inner(|inner, _| Ok(inner.rows.iter().find(|r| r.id == id).cloned()))
    }

    fn delete_older_than(&self, cutoff_ms: i64) -> Result<Vec<MessageRow>> {
        self.with_inner(|inner, path| {
            let expired: Vec<MessageRow> = inner
                .rows
                .iter()
                .filter(|r| r.created_at < cutoff_ms)
                .cloned()
                .collect();

            if !expired.is_empty() {
                let ids = expired.iter().map(|r| r.id.clone()).collect();
                inner.commit(LogEntry::Delete { ids }, path)?;
            }

            let mut gone = std::mem::take(&mut inner.evicted);
            gone.extend(expired);
            Ok(gone)
        })
    }
}
