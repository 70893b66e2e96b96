use std::rc::Rc;

use tutorchat_types::SessionRecord;

use crate::logging::log_payload;
use crate::runtime::Executor;
use crate::services::{RemoteSessionStore, SyncPayload};

/// Best-effort mirror of the local record to the backend.
///
/// Each call uploads a full snapshot on a detached task and returns at once.
/// Uploads may complete in any order. Failures are logged and not retried;
/// the next mutation sends a newer snapshot anyway.
pub struct RemoteSyncAgent {
    remote: Rc<dyn RemoteSessionStore>,
    executor: Rc<dyn Executor>,
}

impl RemoteSyncAgent {
    pub fn new(remote: Rc<dyn RemoteSessionStore>, executor: Rc<dyn Executor>) -> Self {
        Self { remote, executor }
    }

    pub fn payload(record: &SessionRecord) -> SyncPayload {
        SyncPayload {
            session_id: record.session_id().to_string(),
            course_id: record.metadata.course_id.clone(),
            student_id: record.metadata.student_id.clone(),
            unit_name: record.metadata.unit_name.clone(),
            chat_data: record.clone(),
        }
    }

    /// Fire off an upload of `record`
    pub fn sync(&self, record: &SessionRecord) {
        if record.session_id().is_empty() {
            log::debug!("Skipping sync of a record without session id");
            return;
        }
        let payload = Self::payload(record);
        log_payload("chat-sessions", &payload);
        let remote = self.remote.clone();
        self.executor.spawn(Box::pin(async move {
            let session_id = payload.session_id.clone();
            match remote.save(payload).await {
                Ok(ack) if ack.success => log::debug!("Synced session {}", session_id),
                Ok(_) => log::warn!("Remote store rejected session {}", session_id),
                Err(e) => log::warn!("Failed to sync session {}: {:#}", session_id, e),
            }
        }));
    }
}
