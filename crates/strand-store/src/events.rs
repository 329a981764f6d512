use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use strand_core::events::ThreadEventType;
use strand_core::ids::{EventId, ThreadId, ToolCallId};
use strand_core::messages::ToolCallBlock;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored thread event. Immutable once appended; a thread's full state is
/// always reconstructible by folding its event sequence from empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRow {
    pub id: EventId,
    pub thread_id: ThreadId,
    pub parent_id: Option<EventId>,
    pub sequence: i64,
    pub event_type: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

/// Per-thread append lock for event linearization.
/// Keeps sequence assignment and the parent chain atomic.
struct ThreadLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ThreadLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct EventRepo {
    db: Database,
    thread_locks: Mutex<ThreadLocks>,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            thread_locks: Mutex::new(ThreadLocks::new()),
        }
    }

    /// Append an event to a thread. Atomically:
    /// 1. Acquires the per-thread lock
    /// 2. Reads the current head
    /// 3. Inserts the event with parent_id = current head
    /// 4. Updates the thread head_event_id (and root on first append)
    ///
    /// Fails with `StoreError::NotFound` if the thread does not exist.
    /// Once this returns Ok, the event is durable and visible to all
    /// subsequent reads.
    #[instrument(skip(self, payload), fields(thread_id = %thread_id, event_type = %event_type))]
    pub fn append(
        &self,
        thread_id: &ThreadId,
        event_type: ThreadEventType,
        payload: serde_json::Value,
    ) -> Result<EventRow, StoreError> {
        let lock = self.thread_locks.lock().get(thread_id.as_str());
        let _guard = lock.lock();
        self.append_locked(thread_id, event_type, payload)
    }

    /// Append a tool_result event only if none exists yet for this call id.
    /// The existence check and the insert happen under the same per-thread
    /// lock, making the duplicate-execution guard race-free. Returns
    /// `Ok(None)` when a result was already recorded (nothing written).
    #[instrument(skip(self, payload), fields(thread_id = %thread_id, call_id = %tool_call_id))]
    pub fn append_tool_result(
        &self,
        thread_id: &ThreadId,
        tool_call_id: &ToolCallId,
        payload: serde_json::Value,
    ) -> Result<Option<EventRow>, StoreError> {
        let lock = self.thread_locks.lock().get(thread_id.as_str());
        let _guard = lock.lock();

        if self.has_tool_result_inner(thread_id, tool_call_id)? {
            return Ok(None);
        }
        self.append_locked(thread_id, ThreadEventType::ToolResult, payload)
            .map(Some)
    }

    fn append_locked(
        &self,
        thread_id: &ThreadId,
        event_type: ThreadEventType,
        payload: serde_json::Value,
    ) -> Result<EventRow, StoreError> {
        self.db.with_conn(|conn| {
            let (head_event_id, max_seq): (Option<String>, i64) = conn
                .query_row(
                    "SELECT head_event_id, COALESCE((SELECT MAX(sequence) FROM events WHERE thread_id = ?1), -1)
                     FROM threads WHERE id = ?1",
                    [thread_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|_| StoreError::NotFound(format!("thread {thread_id}")))?;

            let event_id = EventId::new();
            let now = Utc::now().to_rfc3339();
            let sequence = max_seq + 1;
            let type_str = event_type.to_string();
            let parent_id = head_event_id.as_deref();

            conn.execute(
                "INSERT INTO events (id, thread_id, parent_id, sequence, type, timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event_id.as_str(),
                    thread_id.as_str(),
                    parent_id,
                    sequence,
                    type_str,
                    now,
                    serde_json::to_string(&payload)?,
                ],
            )?;

            if head_event_id.is_none() {
                conn.execute(
                    "UPDATE threads SET head_event_id = ?1, root_event_id = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![event_id.as_str(), now, thread_id.as_str()],
                )?;
            } else {
                conn.execute(
                    "UPDATE threads SET head_event_id = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![event_id.as_str(), now, thread_id.as_str()],
                )?;
            }

            Ok(EventRow {
                id: event_id,
                thread_id: thread_id.clone(),
                parent_id: head_event_id.map(EventId::from_raw),
                sequence,
                event_type: type_str,
                timestamp: now,
                payload,
            })
        })
    }

    /// Get a single event by ID.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub fn get(&self, event_id: &EventId) -> Result<EventRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, parent_id, sequence, type, timestamp, payload
                 FROM events WHERE id = ?1",
            )?;
            let mut rows = stmt.query([event_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_event(row),
                None => Err(StoreError::NotFound(format!("event {event_id}"))),
            }
        })
    }

    /// List events for a thread, ordered by sequence. Never fails for an
    /// existing thread; a freshly created thread yields an empty list.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn list(
        &self,
        thread_id: &ThreadId,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let limit = limit.unwrap_or(10_000);
            let offset = offset.unwrap_or(0);
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, parent_id, sequence, type, timestamp, payload
                 FROM events WHERE thread_id = ?1
                 ORDER BY sequence ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let mut rows = stmt.query(rusqlite::params![thread_id.as_str(), limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }

    /// List events after a given sequence number (for incremental sync).
    #[instrument(skip(self), fields(thread_id = %thread_id, after_sequence))]
    pub fn list_after_sequence(
        &self,
        thread_id: &ThreadId,
        after_sequence: i64,
        limit: u32,
    ) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, parent_id, sequence, type, timestamp, payload
                 FROM events WHERE thread_id = ?1 AND sequence > ?2
                 ORDER BY sequence ASC
                 LIMIT ?3",
            )?;
            let mut rows =
                stmt.query(rusqlite::params![thread_id.as_str(), after_sequence, limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_event(row)?);
            }
            Ok(results)
        })
    }

    /// Count events for a thread.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn count(&self, thread_id: &ThreadId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM events WHERE thread_id = ?1",
                [thread_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Whether a terminal tool_result is already recorded for a call id.
    #[instrument(skip(self), fields(thread_id = %thread_id, call_id = %tool_call_id))]
    pub fn has_tool_result(
        &self,
        thread_id: &ThreadId,
        tool_call_id: &ToolCallId,
    ) -> Result<bool, StoreError> {
        self.has_tool_result_inner(thread_id, tool_call_id)
    }

    fn has_tool_result_inner(
        &self,
        thread_id: &ThreadId,
        tool_call_id: &ToolCallId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events
                 WHERE thread_id = ?1 AND type = 'tool_result'
                   AND json_extract(payload, '$.tool_call_id') = ?2",
                rusqlite::params![thread_id.as_str(), tool_call_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Find the tool_call event for a call id, decoded into a block.
    #[instrument(skip(self), fields(thread_id = %thread_id, call_id = %tool_call_id))]
    pub fn find_tool_call(
        &self,
        thread_id: &ThreadId,
        tool_call_id: &ToolCallId,
    ) -> Result<Option<ToolCallBlock>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM events
                 WHERE thread_id = ?1 AND type = 'tool_call'
                   AND json_extract(payload, '$.id') = ?2
                 LIMIT 1",
            )?;
            let mut rows = stmt.query(rusqlite::params![thread_id.as_str(), tool_call_id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row_helpers::get(row, 0, "events", "payload")?;
                    let block: ToolCallBlock = serde_json::from_str(&raw)?;
                    Ok(Some(block))
                }
                None => Ok(None),
            }
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, StoreError> {
    let payload_str: String = row_helpers::get(row, 6, "events", "payload")?;
    let payload = row_helpers::parse_json(&payload_str, "events", "payload")?;

    Ok(EventRow {
        id: EventId::from_raw(row_helpers::get::<String>(row, 0, "events", "id")?),
        thread_id: ThreadId::from_raw(row_helpers::get::<String>(row, 1, "events", "thread_id")?),
        parent_id: row_helpers::get_opt::<String>(row, 2, "events", "parent_id")?
            .map(EventId::from_raw),
        sequence: row_helpers::get(row, 3, "events", "sequence")?,
        event_type: row_helpers::get(row, 4, "events", "type")?,
        timestamp: row_helpers::get(row, 5, "events", "timestamp")?,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::ThreadRepo;
    use serde_json::json;

    fn setup() -> (Database, ThreadId) {
        let db = Database::in_memory().unwrap();
        let threads = ThreadRepo::new(db.clone());
        let thread = threads.create("claude-sonnet-4-5", "anthropic", "/tmp", None).unwrap();
        (db, thread.id)
    }

    #[test]
    fn append_event() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);
        let evt = repo
            .append(&tid, ThreadEventType::UserMessage, json!({"text": "hello"}))
            .unwrap();
        assert!(evt.id.as_str().starts_with("evt_"));
        assert_eq!(evt.sequence, 0);
        assert!(evt.parent_id.is_none());
    }

    #[test]
    fn append_to_missing_thread_fails() {
        let db = Database::in_memory().unwrap();
        let repo = EventRepo::new(db);
        let result = repo.append(&ThreadId::new(), ThreadEventType::UserMessage, json!({}));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn append_builds_parent_chain() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);

        let e1 = repo.append(&tid, ThreadEventType::UserMessage, json!({"n": 1})).unwrap();
        let e2 = repo.append(&tid, ThreadEventType::AgentMessage, json!({"n": 2})).unwrap();
        let e3 = repo.append(&tid, ThreadEventType::UserMessage, json!({"n": 3})).unwrap();

        assert!(e1.parent_id.is_none());
        assert_eq!(e2.parent_id.as_ref().unwrap(), &e1.id);
        assert_eq!(e3.parent_id.as_ref().unwrap(), &e2.id);
        assert_eq!((e1.sequence, e2.sequence, e3.sequence), (0, 1, 2));
    }

    #[test]
    fn append_updates_thread_head() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db.clone());
        let threads = ThreadRepo::new(db);

        let e1 = repo.append(&tid, ThreadEventType::UserMessage, json!({})).unwrap();
        let thread = threads.get(&tid).unwrap();
        assert_eq!(thread.head_event_id.as_ref().unwrap(), &e1.id);
        assert_eq!(thread.root_event_id.as_ref().unwrap(), &e1.id);

        let e2 = repo.append(&tid, ThreadEventType::AgentMessage, json!({})).unwrap();
        let thread = threads.get(&tid).unwrap();
        assert_eq!(thread.head_event_id.as_ref().unwrap(), &e2.id);
        assert_eq!(thread.root_event_id.as_ref().unwrap(), &e1.id);
    }

    #[test]
    fn fresh_thread_has_empty_log() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);
        let events = repo.list(&tid, None, None).unwrap();
        assert!(events.is_empty());
        assert_eq!(repo.count(&tid).unwrap(), 0);
    }

    #[test]
    fn list_preserves_order() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);

        for i in 0..5 {
            repo.append(&tid, ThreadEventType::UserMessage, json!({"n": i})).unwrap();
        }

        let all = repo.list(&tid, None, None).unwrap();
        assert_eq!(all.len(), 5);
        for (i, evt) in all.iter().enumerate() {
            assert_eq!(evt.sequence, i as i64);
            assert_eq!(evt.payload["n"], i);
        }
    }

    #[test]
    fn list_after_sequence() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);

        for i in 0..5 {
            repo.append(&tid, ThreadEventType::UserMessage, json!({"n": i})).unwrap();
        }

        let after_2 = repo.list_after_sequence(&tid, 2, 100).unwrap();
        assert_eq!(after_2.len(), 2);
        assert_eq!(after_2[0].sequence, 3);
        assert_eq!(after_2[1].sequence, 4);
    }

    #[test]
    fn tool_result_guard_detects_existing() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);
        let call_id = ToolCallId::from_raw("call_1");

        assert!(!repo.has_tool_result(&tid, &call_id).unwrap());

        repo.append(
            &tid,
            ThreadEventType::ToolResult,
            json!({"tool_call_id": "call_1", "is_error": false, "content": []}),
        )
        .unwrap();

        assert!(repo.has_tool_result(&tid, &call_id).unwrap());
        assert!(!repo.has_tool_result(&tid, &ToolCallId::from_raw("call_2")).unwrap());
    }

    #[test]
    fn append_tool_result_refuses_duplicates() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);
        let call_id = ToolCallId::from_raw("call_1");
        let payload = json!({"tool_call_id": "call_1", "is_error": false, "content": []});

        let first = repo.append_tool_result(&tid, &call_id, payload.clone()).unwrap();
        assert!(first.is_some());

        let second = repo.append_tool_result(&tid, &call_id, payload).unwrap();
        assert!(second.is_none(), "second result for the same call must not be written");

        let results: Vec<_> = repo
            .list(&tid, None, None)
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "tool_result")
            .collect();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn find_tool_call_decodes_block() {
        let (db, tid) = setup();
        let repo = EventRepo::new(db);

        let block = ToolCallBlock {
            id: ToolCallId::from_raw("call_9"),
            name: "read_file".into(),
            arguments: json!({"path": "/tmp/x"}),
        };
        repo.append(&tid, ThreadEventType::ToolCall, serde_json::to_value(&block).unwrap())
            .unwrap();

        let found = repo.find_tool_call(&tid, &ToolCallId::from_raw("call_9")).unwrap();
        let found = found.expect("tool call should be found");
        assert_eq!(found.name, "read_file");
        assert_eq!(found.arguments["path"], "/tmp/x");

        assert!(repo.find_tool_call(&tid, &ToolCallId::from_raw("call_404")).unwrap().is_none());
    }

    #[test]
    fn concurrent_appends_linearized() {
        let (db, tid) = setup();
        let repo = Arc::new(EventRepo::new(db));

        let mut handles = vec![];
        for i in 0..10 {
            let repo = repo.clone();
            let tid = tid.clone();
            handles.push(std::thread::spawn(move || {
                repo.append(&tid, ThreadEventType::UserMessage, json!({"writer": i}))
                    .unwrap()
            }));
        }

        let events: Vec<EventRow> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut seqs: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 10);

        let all = repo.list(&tid, None, None).unwrap();
        for (i, evt) in all.iter().enumerate() {
            if i == 0 {
                assert!(evt.parent_id.is_none());
            } else {
                assert_eq!(
                    evt.parent_id.as_ref().unwrap(),
                    &all[i - 1].id,
                    "broken parent chain at sequence {}",
                    evt.sequence
                );
            }
        }
    }

    #[test]
    fn malformed_payload_surfaces_corrupt_row() {
        let (db, tid) = setup();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, thread_id, parent_id, sequence, type, timestamp, payload)
                 VALUES (?1, ?2, NULL, 0, 'user_message', datetime('now'), 'not valid json')",
                rusqlite::params![EventId::new().as_str(), tid.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = EventRepo::new(db);
        let result = repo.list(&tid, None, None);
        assert!(matches!(result, Err(StoreError::CorruptRow { .. })));
    }
}
