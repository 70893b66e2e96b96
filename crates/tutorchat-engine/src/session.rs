//! The live tutoring session of one student.
//!
//! [`TutorSession`] owns the in-memory [`SessionRecord`] and wires the
//! components together: every mutation goes through the transcript or the
//! assessment engine, is written through to the store before the call
//! returns, and is then mirrored to the backend in the background.
//!
//! Borrows of the record are never held across an await. Operations that
//! call out to a service re-check the session id when they resume, so a
//! reply that arrives after the student started over is dropped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::Either;
use tokio_util::sync::CancellationToken;

use tutorchat_types::{
    ContextTurn, CourseSelection, HistoryEntry, Message, MessageType, Mode, Question, RawAnswer, SessionRecord,
    StudentIdentity,
};

use crate::assessment::{outcome_message, question_prompt, AnswerTicket, AssessmentEngine, AssessmentOutcome, AssessmentState, GradingOutcome};
use crate::config::EngineConfig;
use crate::context::build_context;
use crate::continuity::{resync_question_index, ContinuityDecision, SessionContinuityManager};
use crate::error::EngineError;
use crate::logging::log_payload;
use crate::runtime::{Clock, Executor};
use crate::services::{
    AnswerGradingService, ChatCompletionService, ChatRequest, CourseCatalog, RemoteSessionStore, StruggleTopicService,
};
use crate::storage::KeyValueStorage;
use crate::store::PersistedSessionStore;
use crate::struggle::StruggleGate;
use crate::sync::RemoteSyncAgent;
use crate::transcript::ChatTranscript;

pub const APOLOGY_TEXT: &str = "Sorry, I couldn't get a response right now. Please try again in a moment.";
pub const RESPONSE_STOPPED_TEXT: &str = "Response stopped.";
pub const ASSESSMENT_START_TEXT: &str = "Before we dive in, let's see what you already know. \
Answer a few quick questions so I can pick the right way to work with you.";

/// Everything a session needs from its host
pub struct SessionDeps {
    pub config: EngineConfig,
    pub storage: Rc<dyn KeyValueStorage>,
    pub clock: Rc<dyn Clock>,
    pub executor: Rc<dyn Executor>,
    pub chat: Rc<dyn ChatCompletionService>,
    pub grader: Rc<dyn AnswerGradingService>,
    pub remote: Rc<dyn RemoteSessionStore>,
    pub struggle: Rc<dyn StruggleTopicService>,
    pub catalog: Rc<dyn CourseCatalog>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurnOutcome {
    Replied(Message),
    /// The service failed and an apology was appended instead
    Failed(Message),
    /// Superseded by a newer message or a new session; the reply was discarded
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// Out of order, repeated, or no assessment running. Nothing changed.
    Ignored,
    Answered {
        index: usize,
        is_correct: Option<bool>,
        feedback: Option<String>,
    },
    Completed {
        index: usize,
        is_correct: Option<bool>,
        outcome: AssessmentOutcome,
    },
}

pub struct TutorSession {
    config: EngineConfig,
    student: StudentIdentity,
    clock: Rc<dyn Clock>,
    store: Rc<PersistedSessionStore>,
    continuity: SessionContinuityManager,
    assessment: AssessmentEngine,
    struggle: StruggleGate,
    sync: RemoteSyncAgent,
    chat: Rc<dyn ChatCompletionService>,
    catalog: Rc<dyn CourseCatalog>,
    record: RefCell<SessionRecord>,
    decision: ContinuityDecision,
    in_flight: RefCell<Option<(u64, CancellationToken)>>,
    next_turn: Cell<u64>,
}

impl TutorSession {
    /// Open the session of `student`, resuming the stored one if it is recent
    /// enough. `selection` is the course and unit the page was opened for.
    pub fn open(
        deps: SessionDeps,
        student: StudentIdentity,
        selection: Option<CourseSelection>,
    ) -> Result<Self, EngineError> {
        deps.config.validate()?;
        let config = deps.config;
        let store = Rc::new(PersistedSessionStore::new(
            deps.storage,
            config.storage_namespace.clone(),
            config.history_limit,
        ));
        let continuity =
            SessionContinuityManager::new(store.clone(), config.idle_window(), config.session_id_prefix.clone());
        let now = deps.clock.now();
        let restored = continuity
            .restore(&student, selection.as_ref(), now)
            .ok_or(EngineError::NoSelection)?;

        let struggle = StruggleGate::new(deps.struggle);
        if restored.decision == ContinuityDecision::Resume {
            struggle.restore(&restored.record);
        }

        let session = Self {
            assessment: AssessmentEngine::new(
                deps.grader,
                deps.executor.clone(),
                config.grading_timeout(),
                config.short_answer_min_len,
            ),
            sync: RemoteSyncAgent::new(deps.remote, deps.executor),
            config,
            student,
            clock: deps.clock,
            store,
            continuity,
            struggle,
            chat: deps.chat,
            catalog: deps.catalog,
            record: RefCell::new(restored.record),
            decision: restored.decision,
            in_flight: RefCell::new(None),
            next_turn: Cell::new(0),
        };
        session.complete_interrupted_assessment();
        session.autosave();
        Ok(session)
    }

    /// A reload while the last answer was being graded leaves every question
    /// answered but no result announced. Score it now.
    fn complete_interrupted_assessment(&self) {
        {
            let record = self.record.borrow();
            if AssessmentEngine::state(&record) != AssessmentState::Completed {
                return;
            }
            let started = record
                .messages
                .iter()
                .rposition(|m| m.message_type == MessageType::AssessmentStart);
            let announced = record
                .messages
                .iter()
                .skip(started.unwrap_or(0))
                .any(|m| m.message_type == MessageType::ModeResult);
            if announced {
                return;
            }
        }
        let outcome = self.assessment.finish(&mut self.record.borrow_mut());
        if let Some(outcome) = outcome {
            log::info!("Completing assessment interrupted by a reload");
            self.append(Message::bot(outcome_message(&outcome), MessageType::ModeResult, self.clock.now()));
        }
    }

    pub fn decision(&self) -> ContinuityDecision {
        self.decision
    }

    pub fn session_id(&self) -> String {
        self.record.borrow().session_id().to_string()
    }

    pub fn mode(&self) -> Mode {
        self.record.borrow().metadata.current_mode
    }

    /// Snapshot of the live record
    pub fn record(&self) -> SessionRecord {
        self.record.borrow().clone()
    }

    pub fn assessment_state(&self) -> AssessmentState {
        AssessmentEngine::state(&self.record.borrow())
    }

    pub fn current_question(&self) -> Option<(usize, Question)> {
        let record = self.record.borrow();
        AssessmentEngine::current_question(&record).map(|(i, q)| (i, q.clone()))
    }

    pub fn active_struggle_topic(&self) -> Option<String> {
        self.struggle.active_topic()
    }

    /// Write the record through to the store, then mirror it to the backend
    fn autosave(&self) {
        let record = self.record.borrow();
        if let Err(e) = self.store.put(&self.student.student_id, &record) {
            log::warn!("Failed to save session {}: {}", record.session_id(), e);
        }
        self.sync.sync(&record);
    }

    fn append(&self, message: Message) -> Message {
        let now = self.clock.now();
        let mut record = self.record.borrow_mut();
        let appended = ChatTranscript::new(&mut record).append(message, now).clone();
        appended
    }

    /// Stop the in-flight chat turn, if any. Returns whether one was stopped.
    fn cancel_in_flight(&self) -> bool {
        match self.in_flight.borrow_mut().take() {
            Some((turn, token)) => {
                log::debug!("Cancelling chat turn {}", turn);
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn finish_turn(&self, turn: u64) {
        let mut in_flight = self.in_flight.borrow_mut();
        if matches!(in_flight.as_ref(), Some((current, _)) if *current == turn) {
            *in_flight = None;
        }
    }

    /// History for the next chat turn, built from the record
    pub fn conversation_context(&self) -> Option<Vec<ContextTurn>> {
        let record = self.record.borrow();
        build_context(&record, record.session_id(), &self.assessment)
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// Send a student message and wait for the tutor's reply
    pub async fn send_message(&self, text: &str) -> ChatTurnOutcome {
        if self.cancel_in_flight() {
            self.append(Message::bot(RESPONSE_STOPPED_TEXT, MessageType::SystemNotice, self.clock.now()));
        }
        let turn = self.next_turn.get() + 1;
        self.next_turn.set(turn);
        let token = CancellationToken::new();
        *self.in_flight.borrow_mut() = Some((turn, token.clone()));

        let (request, count, session_id) = {
            let context = self.conversation_context();
            let now = self.clock.now();
            let mut record = self.record.borrow_mut();
            let mut transcript = ChatTranscript::new(&mut record);
            transcript.append(Message::user(text, MessageType::RegularChat, now), now);
            let count = transcript.regular_chat_count();
            transcript.inject_volume_warning(count, &self.config.volume_warning_counts, now);

            let request = ChatRequest {
                message: text.to_string(),
                mode: record.metadata.current_mode,
                course_id: record.metadata.course_id.clone(),
                unit_name: record.metadata.unit_name.clone(),
                student_id: record.metadata.student_id.clone(),
                student_name: record.metadata.student_name.clone(),
                session_id: record.session_id().to_string(),
                context,
            };
            (request, count, record.session_id().to_string())
        };
        self.autosave();
        log_payload("chat", &request);

        let call = self.chat.send(request);
        let cancelled = token.cancelled();
        futures::pin_mut!(cancelled);
        let result = match futures::future::select(call, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => {
                log::info!("Chat turn {} cancelled", turn);
                return ChatTurnOutcome::Cancelled;
            }
        };
        self.finish_turn(turn);
        if token.is_cancelled() || self.record.borrow().session_id() != session_id {
            log::info!("Discarding reply to superseded chat turn {}", turn);
            return ChatTurnOutcome::Cancelled;
        }

        let reply = match result {
            Ok(reply) if reply.success => reply,
            Ok(reply) => {
                log::error!("Chat service reported failure: {}", reply.message);
                return self.apologize();
            }
            Err(e) => {
                log::error!("Chat request failed: {:#}", e);
                return self.apologize();
            }
        };

        let topic = match &reply.struggle_state {
            Some(state) => self.struggle.observe(state),
            None => self.struggle.active_topic(),
        };
        let message = {
            let now = self.clock.now();
            let mut record = self.record.borrow_mut();
            let mode = record.metadata.current_mode;
            record.metadata.active_struggle_topic = topic.clone();
            let mut transcript = ChatTranscript::new(&mut record);
            let mut content = reply.message;
            if let Some(prompt) = transcript.take_reflection_prompt(count, &self.config.reflection_prompt_counts, mode) {
                content.push_str("\n\n");
                content.push_str(prompt);
            }
            let message = Message::bot(content, MessageType::RegularChat, now)
                .with_attribution(reply.source_attribution)
                .with_struggle_topic(topic);
            let appended = transcript.append(message, now).clone();
            appended
        };
        self.autosave();
        ChatTurnOutcome::Replied(message)
    }

    fn apologize(&self) -> ChatTurnOutcome {
        let message = self.append(Message::bot(APOLOGY_TEXT, MessageType::SystemNotice, self.clock.now()));
        self.autosave();
        ChatTurnOutcome::Failed(message)
    }

    // ------------------------------------------------------------------
    // Assessment
    // ------------------------------------------------------------------

    /// Start a calibration run with the given questions and present the first one
    pub fn start_assessment(&self, questions: Vec<Question>, pass_threshold: u32) -> Result<(), EngineError> {
        let now = self.clock.now();
        {
            let mut record = self.record.borrow_mut();
            if let Err(e) = self.assessment.start(&mut record, questions, pass_threshold, now) {
                log::debug!("Assessment not started: {}", e);
                return Ok(());
            }
            let mut transcript = ChatTranscript::new(&mut record);
            transcript.append(Message::bot(ASSESSMENT_START_TEXT, MessageType::AssessmentStart, now), now);
        }
        self.present_current_question();
        self.autosave();
        Ok(())
    }

    /// Look up the current unit in the catalog and start its calibration.
    /// Returns `false` when the unit is unpublished or has no questions.
    pub async fn start_assessment_for_unit(&self) -> Result<bool, EngineError> {
        let selection = self.record.borrow().selection();
        let course = self
            .catalog
            .course(&selection.course_id)
            .await
            .map_err(EngineError::Catalog)?;
        let Some(course) = course else {
            log::info!("Course {} not found in catalog", selection.course_id);
            return Ok(false);
        };
        let Some(unit) = course.unit(&selection.unit_name) else {
            log::info!("Unit {} not found in course {}", selection.unit_name, course.id);
            return Ok(false);
        };
        if !unit.published || unit.questions.is_empty() {
            log::info!(
                "Unit {} has no published calibration questions, skipping assessment",
                unit.name
            );
            return Ok(false);
        }
        if self.record.borrow().selection() != selection {
            log::debug!("Unit changed during catalog lookup, not starting assessment");
            return Ok(false);
        }
        let threshold = unit
            .pass_threshold
            .or_else(|| unit.questions.iter().find_map(|q| q.pass_threshold))
            .unwrap_or(self.config.default_pass_threshold);
        self.start_assessment(unit.questions.clone(), threshold)?;
        Ok(true)
    }

    fn present_current_question(&self) {
        let now = self.clock.now();
        let mut record = self.record.borrow_mut();
        let prompt = match AssessmentEngine::current_question(&record) {
            Some((i, question)) => {
                let total = record.assessment.as_ref().map_or(0, |a| a.questions.len());
                question_prompt(i, total, question)
            }
            None => return,
        };
        ChatTranscript::new(&mut record).append(Message::bot(prompt, MessageType::PracticeTestQuestion, now), now);
    }

    /// Answer question `index`. Short answers are graded by the grading
    /// service before the next question is presented.
    pub async fn answer_question(&self, index: usize, answer: RawAnswer) -> AnswerOutcome {
        let now = self.clock.now();
        let (ticket, session_id) = {
            let mut record = self.record.borrow_mut();
            let ticket = match self.assessment.record_answer(&mut record, index, answer.clone(), now) {
                Ok(ticket) => ticket,
                Err(e) => {
                    log::debug!("Ignoring answer: {}", e);
                    return AnswerOutcome::Ignored;
                }
            };
            let label = record
                .assessment
                .as_ref()
                .map(|a| a.questions[index].answer_label(&answer))
                .unwrap_or_else(|| answer.as_text());
            ChatTranscript::new(&mut record).append(Message::user(label, MessageType::PracticeTestQuestion, now), now);
            (ticket, record.session_id().to_string())
        };
        self.autosave();

        let (is_correct, feedback) = match ticket {
            AnswerTicket::Graded { is_correct, .. } => (Some(is_correct), None),
            AnswerTicket::NeedsGrading { question, answer, .. } => {
                let grading = self.assessment.grade(&question, &answer).await;
                let verdict = match &grading {
                    GradingOutcome::Graded { correct, feedback } => (Some(*correct), Some(feedback.clone())),
                    GradingOutcome::Unavailable => (None, None),
                };
                let now = self.clock.now();
                let mut record = self.record.borrow_mut();
                if record.session_id() != session_id {
                    log::info!("Session changed while grading question {}, dropping result", index);
                    return AnswerOutcome::Ignored;
                }
                if let Err(e) = self.assessment.apply_grading(&mut record, index, grading, now) {
                    log::debug!("Ignoring grading result: {}", e);
                    return AnswerOutcome::Ignored;
                }
                verdict
            }
        };

        let outcome = self.assessment.finish(&mut self.record.borrow_mut());
        let result = match outcome {
            Some(outcome) => {
                let text = outcome_message(&outcome);
                self.append(Message::bot(text, MessageType::ModeResult, self.clock.now()));
                AnswerOutcome::Completed { index, is_correct, outcome }
            }
            None => {
                self.present_current_question();
                AnswerOutcome::Answered { index, is_correct, feedback }
            }
        };
        self.autosave();
        result
    }

    /// Flip between tutor and protégé mode. Ignored while an assessment is
    /// running; returns the new mode otherwise.
    pub fn toggle_mode(&self) -> Option<Mode> {
        if matches!(self.assessment_state(), AssessmentState::InProgress(_)) {
            log::debug!("Mode toggle ignored during assessment");
            return None;
        }
        let now = self.clock.now();
        let mode = {
            let mut record = self.record.borrow_mut();
            let mode = match record.metadata.current_mode {
                Mode::Tutor => Mode::Protege,
                Mode::Protege => Mode::Tutor,
            };
            record.metadata.current_mode = mode;
            record.metadata.last_manual_mode_change = Some(now);
            let text = format!("Switched to {} mode.", mode.display_name());
            ChatTranscript::new(&mut record).append(Message::bot(text, MessageType::ModeToggleResult, now), now);
            mode
        };
        log::info!("Mode manually set to {}", mode);
        self.autosave();
        Some(mode)
    }

    // ------------------------------------------------------------------
    // Struggle topics
    // ------------------------------------------------------------------

    /// Reset the active struggle topic with the backend
    pub async fn reset_struggle_topic(&self) -> Result<String, EngineError> {
        let course_id = self.record.borrow().metadata.course_id.clone();
        let topic = self.struggle.reset(&course_id).await?;
        self.record.borrow_mut().metadata.active_struggle_topic = None;
        self.autosave();
        Ok(topic)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Archive the current session and start an empty one for the same unit.
    /// Returns the new session id.
    pub fn new_session(&self) -> String {
        let selection = self.record.borrow().selection();
        self.start_over(&selection);
        self.session_id()
    }

    /// Switch to another course or unit, archiving the current session.
    /// Selecting the current unit again changes nothing.
    pub fn select_unit(&self, selection: CourseSelection) -> bool {
        {
            let record = self.record.borrow();
            if record.metadata.course_id == selection.course_id && record.metadata.unit_name == selection.unit_name {
                return false;
            }
        }
        self.start_over(&selection);
        let text = if selection.course_name.is_empty() {
            format!("You're now working on {}.", selection.unit_name)
        } else {
            format!("You're now working on {} in {}.", selection.unit_name, selection.course_name)
        };
        self.append(Message::bot(text, MessageType::UnitSelection, self.clock.now()));
        self.autosave();
        true
    }

    fn start_over(&self, selection: &CourseSelection) {
        let current = self.record.borrow().clone();
        self.replace_with_fresh(current, selection);
    }

    /// Archive `current` and make an empty session for `selection` live
    fn replace_with_fresh(&self, current: SessionRecord, selection: &CourseSelection) {
        self.cancel_in_flight();
        let now = self.clock.now();
        let (record, archived) = self.continuity.start_over(current, &self.student, selection, now);
        if let Some(entry) = archived {
            log::info!("Archived session {} ({} messages)", entry.session_id, entry.message_count);
        }
        self.struggle.restore(&record);
        *self.record.borrow_mut() = record;
        self.autosave();
    }

    /// Archived sessions, most recent first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.store.history(&self.student.student_id)
    }

    /// Pretty JSON snapshot of the record, stamped with the export time
    pub fn export(&self) -> Result<String, EngineError> {
        let mut record = self.record.borrow().clone();
        record.metadata.export_timestamp = Some(self.clock.now());
        serde_json::to_string_pretty(&record).map_err(EngineError::Export)
    }

    /// Re-read the stored record, e.g. when the tab regains focus.
    ///
    /// Adopts the stored record if it is for the same course and unit. A
    /// stored record idle past the window is archived and replaced by a fresh
    /// session, as on page load. A manual mode toggle made in this tab within
    /// the override window wins over the stored mode. Returns whether the
    /// record was replaced.
    pub fn refresh_from_store(&self) -> bool {
        let Some(mut stored) = self.store.get(&self.student.student_id) else {
            return false;
        };
        let now = self.clock.now();
        let mut record = self.record.borrow_mut();
        if stored.metadata.course_id != record.metadata.course_id
            || stored.metadata.unit_name != record.metadata.unit_name
        {
            log::debug!("Stored session is for another unit, keeping the live one");
            return false;
        }
        if !stored.is_blank() && self.continuity.decide(Some(&stored), now) == ContinuityDecision::Fresh {
            drop(record);
            log::info!("Session {} idle past the window, starting fresh", stored.session_id());
            let selection = stored.selection();
            self.replace_with_fresh(stored, &selection);
            return true;
        }

        let manual = record
            .metadata
            .last_manual_mode_change
            .filter(|at| now - *at <= self.config.manual_override_window());
        if let Some(at) = manual {
            if stored.metadata.current_mode != record.metadata.current_mode {
                log::info!(
                    "Keeping manually selected {} mode over stored {} mode",
                    record.metadata.current_mode,
                    stored.metadata.current_mode
                );
            }
            stored.metadata.current_mode = record.metadata.current_mode;
            stored.metadata.last_manual_mode_change = Some(at);
        }
        resync_question_index(&mut stored);
        self.struggle.restore(&stored);
        *record = stored;
        true
    }
}
