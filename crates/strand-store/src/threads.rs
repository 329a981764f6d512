use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use strand_core::ids::{EventId, ThreadId};
use strand_core::tokens::AccumulatedTokens;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Archived,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

/// One conversation thread. `parent_thread_id` is a reference, not
/// ownership — a child thread's lifetime is independent of its parent's.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadRow {
    pub id: ThreadId,
    pub parent_thread_id: Option<ThreadId>,
    pub status: ThreadStatus,
    pub model: String,
    pub provider: String,
    pub working_directory: String,
    pub title: Option<String>,
    pub tokens: AccumulatedTokens,
    pub head_event_id: Option<EventId>,
    pub root_event_id: Option<EventId>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ThreadRepo {
    db: Database,
}

impl ThreadRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new thread.
    #[instrument(skip(self), fields(model, provider))]
    pub fn create(
        &self,
        model: &str,
        provider: &str,
        working_directory: &str,
        parent_thread_id: Option<&ThreadId>,
    ) -> Result<ThreadRow, StoreError> {
        let id = ThreadId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO threads (id, parent_thread_id, status, model, provider, working_directory, created_at, updated_at)
                 VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    parent_thread_id.map(|p| p.as_str()),
                    model,
                    provider,
                    working_directory,
                    now,
                    now,
                ],
            )?;

            Ok(ThreadRow {
                id,
                parent_thread_id: parent_thread_id.cloned(),
                status: ThreadStatus::Active,
                model: model.to_string(),
                provider: provider.to_string(),
                working_directory: working_directory.to_string(),
                title: None,
                tokens: AccumulatedTokens::default(),
                head_event_id: None,
                root_event_id: None,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Get a thread by ID.
    #[instrument(skip(self), fields(thread_id = %id))]
    pub fn get(&self, id: &ThreadId) -> Result<ThreadRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, parent_thread_id, status, model, provider, working_directory, title,
                        total_prompt_tokens, total_completion_tokens, total_tokens, turn_count,
                        head_event_id, root_event_id, created_at, updated_at
                 FROM threads WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_thread(row),
                None => Err(StoreError::NotFound(format!("thread {id}"))),
            }
        })
    }

    /// List threads, newest first.
    #[instrument(skip(self))]
    pub fn list(
        &self,
        status: Option<&ThreadStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ThreadRow>, StoreError> {
        self.db.with_conn(|conn| {
            let (sql, params) = match status {
                Some(s) => (
                    "SELECT id, parent_thread_id, status, model, provider, working_directory, title,
                            total_prompt_tokens, total_completion_tokens, total_tokens, turn_count,
                            head_event_id, root_event_id, created_at, updated_at
                     FROM threads WHERE status = ?1
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    vec![s.to_string(), limit.to_string(), offset.to_string()],
                ),
                None => (
                    "SELECT id, parent_thread_id, status, model, provider, working_directory, title,
                            total_prompt_tokens, total_completion_tokens, total_tokens, turn_count,
                            head_event_id, root_event_id, created_at, updated_at
                     FROM threads
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    vec![limit.to_string(), offset.to_string()],
                ),
            };

            let mut stmt = conn.prepare(sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_thread(row)?);
            }
            Ok(results)
        })
    }

    /// List child threads of a parent.
    #[instrument(skip(self), fields(parent = %parent_thread_id))]
    pub fn children(&self, parent_thread_id: &ThreadId) -> Result<Vec<ThreadRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, parent_thread_id, status, model, provider, working_directory, title,
                        total_prompt_tokens, total_completion_tokens, total_tokens, turn_count,
                        head_event_id, root_event_id, created_at, updated_at
                 FROM threads WHERE parent_thread_id = ?1
                 ORDER BY created_at ASC",
            )?;
            let mut rows = stmt.query([parent_thread_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_thread(row)?);
            }
            Ok(results)
        })
    }

    /// Update thread token accumulators.
    #[instrument(skip(self, tokens), fields(thread_id = %thread_id))]
    pub fn update_tokens(
        &self,
        thread_id: &ThreadId,
        tokens: &AccumulatedTokens,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE threads SET
                    total_prompt_tokens = ?1,
                    total_completion_tokens = ?2,
                    total_tokens = ?3,
                    turn_count = ?4,
                    updated_at = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    tokens.total_prompt_tokens as i64,
                    tokens.total_completion_tokens as i64,
                    tokens.total_tokens as i64,
                    tokens.turn_count,
                    now,
                    thread_id.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    /// Update thread status (archive, reactivate).
    #[instrument(skip(self), fields(thread_id = %thread_id, status = %status))]
    pub fn update_status(
        &self,
        thread_id: &ThreadId,
        status: ThreadStatus,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE threads SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, thread_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Update thread title.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn update_title(&self, thread_id: &ThreadId, title: Option<&str>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now, thread_id.as_str()],
            )?;
            Ok(())
        })
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> Result<ThreadRow, StoreError> {
    let status_str: String = row_helpers::get(row, 2, "threads", "status")?;

    Ok(ThreadRow {
        id: ThreadId::from_raw(row_helpers::get::<String>(row, 0, "threads", "id")?),
        parent_thread_id: row_helpers::get_opt::<String>(row, 1, "threads", "parent_thread_id")?
            .map(ThreadId::from_raw),
        status: row_helpers::parse_enum(&status_str, "threads", "status")?,
        model: row_helpers::get(row, 3, "threads", "model")?,
        provider: row_helpers::get(row, 4, "threads", "provider")?,
        working_directory: row_helpers::get(row, 5, "threads", "working_directory")?,
        title: row_helpers::get_opt(row, 6, "threads", "title")?,
        tokens: AccumulatedTokens {
            total_prompt_tokens: row_helpers::get::<i64>(row, 7, "threads", "total_prompt_tokens")? as u64,
            total_completion_tokens: row_helpers::get::<i64>(row, 8, "threads", "total_completion_tokens")?
                as u64,
            total_tokens: row_helpers::get::<i64>(row, 9, "threads", "total_tokens")? as u64,
            turn_count: row_helpers::get::<i64>(row, 10, "threads", "turn_count")? as u32,
        },
        head_event_id: row_helpers::get_opt::<String>(row, 11, "threads", "head_event_id")?
            .map(EventId::from_raw),
        root_event_id: row_helpers::get_opt::<String>(row, 12, "threads", "root_event_id")?
            .map(EventId::from_raw),
        created_at: row_helpers::get(row, 13, "threads", "created_at")?,
        updated_at: row_helpers::get(row, 14, "threads", "updated_at")?,
    })
}
