//! Same-session vs. new-session decisions and session-id lifecycle.

use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tutorchat_types::{CourseSelection, HistoryEntry, SessionRecord, StudentIdentity};

use crate::store::PersistedSessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityDecision {
    /// Keep the stored transcript, assessment progress and session id
    Resume,
    /// Start over with a new session id, keeping only the course selection
    Fresh,
}

/// Result of opening a student's session on page load
#[derive(Debug)]
pub struct RestoredSession {
    pub record: SessionRecord,
    pub decision: ContinuityDecision,
    /// The previous record, if it was archived to make room for this one
    pub archived: Option<HistoryEntry>,
}

pub struct SessionContinuityManager {
    store: Rc<PersistedSessionStore>,
    idle_window: Duration,
    id_prefix: String,
}

impl SessionContinuityManager {
    pub fn new(store: Rc<PersistedSessionStore>, idle_window: Duration, id_prefix: impl Into<String>) -> Self {
        Self {
            store,
            idle_window,
            id_prefix: id_prefix.into(),
        }
    }

    /// Decide whether a stored record should be resumed at `now`.
    ///
    /// An idle gap of exactly the window still resumes; anything longer starts
    /// fresh. A last-activity time in the future (clock skew) counts as zero.
    pub fn decide(&self, record: Option<&SessionRecord>, now: DateTime<Utc>) -> ContinuityDecision {
        let Some(record) = record else {
            return ContinuityDecision::Fresh;
        };
        if record.is_blank() {
            return ContinuityDecision::Fresh;
        }
        if self.within_idle_window(record, now) {
            ContinuityDecision::Resume
        } else {
            ContinuityDecision::Fresh
        }
    }

    fn within_idle_window(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        now - record.last_activity_timestamp <= self.idle_window
    }

    /// `{prefix}_{epochMillis}_{random9}`
    pub fn allocate_session_id(&self, now: DateTime<Utc>) -> String {
        let random = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}", self.id_prefix, now.timestamp_millis(), &random[..9])
    }

    /// Load the stored record for `student` and decide how to continue.
    ///
    /// `selection` is the course and unit the page was opened for; `None`
    /// keeps whatever the stored record has. A stored record for a different
    /// course or unit is superseded and archived. Returns `None` only when
    /// there is neither a selection nor a stored record to take one from.
    pub fn restore(
        &self,
        student: &StudentIdentity,
        selection: Option<&CourseSelection>,
        now: DateTime<Utc>,
    ) -> Option<RestoredSession> {
        let stored = self.store.get(&student.student_id);

        let selection = match (selection, stored.as_ref()) {
            (Some(selection), _) => selection.clone(),
            (None, Some(record)) => record.selection(),
            (None, None) => return None,
        };

        let stored = match stored {
            Some(record) if same_unit(&record, &selection) => Some(record),
            Some(record) => {
                log::info!(
                    "Stored session {} is for {}/{}, superseded by {}/{}",
                    record.session_id(),
                    record.metadata.course_id,
                    record.metadata.unit_name,
                    selection.course_id,
                    selection.unit_name
                );
                let archived = self.archive(record, now);
                let record = self.fresh_record(student, &selection, None, now);
                return Some(RestoredSession {
                    record,
                    decision: ContinuityDecision::Fresh,
                    archived,
                });
            }
            None => None,
        };

        let stored = stored.map(|record| self.reconcile_session_id(record));

        match self.decide(stored.as_ref(), now) {
            ContinuityDecision::Resume => {
                let mut record = stored?;
                resync_question_index(&mut record);
                log::info!(
                    "Resuming session {} ({} messages, {} answers)",
                    record.session_id(),
                    record.messages.len(),
                    record.answered_count()
                );
                Some(RestoredSession {
                    record,
                    decision: ContinuityDecision::Resume,
                    archived: None,
                })
            }
            ContinuityDecision::Fresh => {
                // A blank record inside the idle window keeps its id
                let reuse_id = stored
                    .as_ref()
                    .filter(|r| r.is_blank() && self.within_idle_window(r, now))
                    .map(|r| r.session_id().to_string())
                    .filter(|id| !id.is_empty());

                let mut archived = None;
                let mut previous_mode = None;
                if let Some(record) = stored {
                    previous_mode = Some(record.metadata.current_mode);
                    if reuse_id.is_none() {
                        archived = self.archive(record, now);
                    }
                }

                let mut record = self.fresh_record(student, &selection, reuse_id, now);
                if let Some(mode) = previous_mode {
                    record.metadata.current_mode = mode;
                }
                Some(RestoredSession {
                    record,
                    decision: ContinuityDecision::Fresh,
                    archived,
                })
            }
        }
    }

    /// Close `current` into history and start an empty session for `selection`
    pub fn start_over(
        &self,
        current: SessionRecord,
        student: &StudentIdentity,
        selection: &CourseSelection,
        now: DateTime<Utc>,
    ) -> (SessionRecord, Option<HistoryEntry>) {
        let mode = current.metadata.current_mode;
        let archived = self.archive(current, now);
        let mut record = self.fresh_record(student, selection, None, now);
        record.metadata.current_mode = mode;
        (record, archived)
    }

    fn fresh_record(
        &self,
        student: &StudentIdentity,
        selection: &CourseSelection,
        session_id: Option<String>,
        now: DateTime<Utc>,
    ) -> SessionRecord {
        let session_id = session_id.unwrap_or_else(|| self.allocate_session_id(now));
        if let Err(e) = self.store.remember_session_id(
            &student.student_id,
            &selection.course_id,
            &selection.unit_name,
            &session_id,
        ) {
            log::warn!("Failed to store session id mapping: {}", e);
        }
        log::info!("Starting session {} for {}", session_id, student.student_id);
        SessionRecord::new(student, selection, session_id, now)
    }

    /// Make the record's session id and the per-triple lookup agree. The
    /// record wins when both exist.
    fn reconcile_session_id(&self, mut record: SessionRecord) -> SessionRecord {
        let student_id = record.metadata.student_id.clone();
        let course_id = record.metadata.course_id.clone();
        let unit_name = record.metadata.unit_name.clone();
        let mapped = self.store.session_id_for(&student_id, &course_id, &unit_name);

        if record.session_id().is_empty() {
            if let Some(id) = mapped {
                log::debug!("Record had no session id, adopting mapped id {}", id);
                record.session_info.session_id = id;
            }
        } else if mapped.as_deref() != Some(record.session_id()) {
            log::debug!(
                "Session id mapping {:?} disagrees with record {}, record wins",
                mapped,
                record.session_id()
            );
            if let Err(e) = self.store.remember_session_id(&student_id, &course_id, &unit_name, record.session_id()) {
                log::warn!("Failed to store session id mapping: {}", e);
            }
        }
        record
    }

    fn archive(&self, mut record: SessionRecord, now: DateTime<Utc>) -> Option<HistoryEntry> {
        if record.is_blank() {
            return None;
        }
        record.close(now);
        let entry = HistoryEntry::from_record(record, now);
        let student_id = entry.record.metadata.student_id.clone();
        if let Err(e) = self.store.append_history(&student_id, entry.clone()) {
            log::warn!("Failed to archive session {}: {}", entry.session_id, e);
        }
        Some(entry)
    }
}

fn same_unit(record: &SessionRecord, selection: &CourseSelection) -> bool {
    record.metadata.course_id == selection.course_id && record.metadata.unit_name == selection.unit_name
}

/// Recompute the next question from the answers actually stored, rather than
/// trusting the persisted index, so a partial write cannot skip or repeat one.
pub(crate) fn resync_question_index(record: &mut SessionRecord) {
    let answered = record.answered_count();
    if let Some(assessment) = record.assessment.as_mut() {
        let index = answered.min(assessment.questions.len());
        if assessment.current_question_index != index {
            log::debug!(
                "Stored question index {} corrected to {}",
                assessment.current_question_index,
                index
            );
        }
        assessment.current_question_index = index;
    }
}
