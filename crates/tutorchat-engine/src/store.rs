use std::rc::Rc;

use tutorchat_types::{HistoryEntry, SessionRecord};

use crate::error::{StoreError, StorageError};
use crate::storage::KeyValueStorage;

/// Durable per-student session state on top of a key-value backend.
///
/// Layout under the namespace `ns`:
/// - `ns:session:{student}` holds the current [`SessionRecord`]
/// - `ns:session-id:{student}:{course}:{unit}` holds the session id of that triple
/// - `ns:history:{student}` holds archived sessions, most recent first
///
/// Reads fail open: anything unreadable or malformed is logged and reported
/// as absent, so callers start a fresh session instead of blocking.
pub struct PersistedSessionStore {
    storage: Rc<dyn KeyValueStorage>,
    namespace: String,
    history_limit: usize,
}

impl PersistedSessionStore {
    pub fn new(storage: Rc<dyn KeyValueStorage>, namespace: impl Into<String>, history_limit: usize) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            history_limit,
        }
    }

    fn session_key(&self, student_id: &str) -> String {
        format!("{}:session:{}", self.namespace, student_id)
    }

    fn session_id_key(&self, student_id: &str, course_id: &str, unit_name: &str) -> String {
        format!("{}:session-id:{}:{}:{}", self.namespace, student_id, course_id, unit_name)
    }

    fn history_key(&self, student_id: &str) -> String {
        format!("{}:history:{}", self.namespace, student_id)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }

    /// Load the current record of a student
    pub fn get(&self, student_id: &str) -> Option<SessionRecord> {
        let key = self.session_key(student_id);
        let json = self.read(&key)?;
        match serde_json::from_str::<SessionRecord>(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Discarding malformed session record {}: {}", key, e);
                None
            }
        }
    }

    /// Overwrite the current record of a student
    pub fn put(&self, student_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record).map_err(|source| StoreError::Serialize {
            what: "session record",
            source,
        })?;
        self.storage.set_item(&self.session_key(student_id), &json)?;
        Ok(())
    }

    pub fn session_id_for(&self, student_id: &str, course_id: &str, unit_name: &str) -> Option<String> {
        self.read(&self.session_id_key(student_id, course_id, unit_name))
            .filter(|id| !id.trim().is_empty())
    }

    pub fn remember_session_id(
        &self,
        student_id: &str,
        course_id: &str,
        unit_name: &str,
        session_id: &str,
    ) -> Result<(), StorageError> {
        self.storage
            .set_item(&self.session_id_key(student_id, course_id, unit_name), session_id)
    }

    /// Archived sessions, most recent first
    pub fn history(&self, student_id: &str) -> Vec<HistoryEntry> {
        let key = self.history_key(student_id);
        let Some(json) = self.read(&key) else {
            return Vec::new();
        };
        match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Discarding malformed history {}: {}", key, e);
                Vec::new()
            }
        }
    }

    /// Prepend an entry to the history log, evicting the oldest beyond the cap
    pub fn append_history(&self, student_id: &str, entry: HistoryEntry) -> Result<(), StoreError> {
        let mut entries = self.history(student_id);
        entries.insert(0, entry);
        if entries.len() > self.history_limit {
            let evicted = entries.len() - self.history_limit;
            entries.truncate(self.history_limit);
            log::debug!("Evicted {} archived session(s) for {}", evicted, student_id);
        }
        let json = serde_json::to_string(&entries).map_err(|source| StoreError::Serialize {
            what: "session history",
            source,
        })?;
        self.storage.set_item(&self.history_key(student_id), &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use tutorchat_types::{CourseSelection, Message, MessageType, StudentIdentity};

    fn record(session_id: &str) -> SessionRecord {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let mut record = SessionRecord::new(
            &StudentIdentity { student_id: "s1".into(), student_name: "Ada".into() },
            &CourseSelection { course_id: "bio".into(), course_name: "Biology".into(), unit_name: "Cells".into() },
            session_id,
            now,
        );
        record.messages.push(Message::user("hello", MessageType::RegularChat, now));
        record
    }

    fn store(storage: Rc<MemoryStorage>, limit: usize) -> PersistedSessionStore {
        PersistedSessionStore::new(storage, "tc", limit)
    }

    #[test]
    fn test_put_then_get() {
        let storage = Rc::new(MemoryStorage::new());
        let store = store(storage.clone(), 50);
        assert!(store.get("s1").is_none());

        store.put("s1", &record("a")).unwrap();
        store.put("s1", &record("b")).unwrap();
        assert_eq!(store.get("s1").unwrap().session_id(), "b");
        assert!(storage.get_item("tc:session:s1").unwrap().is_some());
    }

    #[test]
    fn test_malformed_record_reads_as_absent() {
        let storage = Rc::new(MemoryStorage::new());
        storage.set_item("tc:session:s1", "{not json").unwrap();
        storage
            .set_item("tc:session:s2", r#"{"metadata": {}, "sessionInfo": {}}"#)
            .unwrap();
        let store = store(storage, 50);
        assert!(store.get("s1").is_none());
        assert!(store.get("s2").is_none());
    }

    #[test]
    fn test_history_is_bounded_and_most_recent_first() {
        let storage = Rc::new(MemoryStorage::new());
        let store = store(storage, 3);
        let at = Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap();
        for i in 0..5 {
            store
                .append_history("s1", HistoryEntry::from_record(record(&format!("sess-{}", i)), at))
                .unwrap();
        }
        let ids: Vec<_> = store.history("s1").into_iter().map(|e| e.session_id).collect();
        assert_eq!(ids, vec!["sess-4", "sess-3", "sess-2"]);
    }

    #[test]
    fn test_session_id_mapping_per_triple() {
        let storage = Rc::new(MemoryStorage::new());
        let store = store(storage, 50);
        store.remember_session_id("s1", "bio", "Cells", "x").unwrap();
        assert_eq!(store.session_id_for("s1", "bio", "Cells").as_deref(), Some("x"));
        assert!(store.session_id_for("s1", "bio", "Genes").is_none());
        store.remember_session_id("s1", "bio", "Cells", "y").unwrap();
        assert_eq!(store.session_id_for("s1", "bio", "Cells").as_deref(), Some("y"));
    }
}
