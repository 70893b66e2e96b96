//! Core types and structures for tutorchat
//!
//! This crate provides the canonical session data model shared by the engine
//! and the browser surface. Everything here is plain data: no storage, no
//! network, no clocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod question;

pub use question::{ChoiceOption, Question, QuestionKind, RawAnswer, RawQuestion};

// ============================================================================
// Constants
// ============================================================================

/// Version stamped into every persisted record's metadata
pub const SCHEMA_VERSION: u32 = 2;

/// Labels presented for the two options of a true/false question, in index order
pub const TRUE_FALSE_LABELS: [&str; 2] = ["True", "False"];

// ============================================================================
// Modes and identities
// ============================================================================

/// Interaction style of the tutor bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Tutor,
    Protege,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Tutor => "tutor",
            Mode::Protege => "protege",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Tutor => "Tutor",
            Mode::Protege => "Protégé",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown mode: {0}")]
pub struct ParseModeError(pub String);

impl std::str::FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tutor" => Ok(Mode::Tutor),
            "protege" | "protégé" => Ok(Mode::Protege),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// The student a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub student_id: String,
    #[serde(default)]
    pub student_name: String,
}

/// The course and unit the student is currently working in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSelection {
    pub course_id: String,
    #[serde(default)]
    pub course_name: String,
    pub unit_name: String,
}

// ============================================================================
// Message Types
// ============================================================================

/// Who produced a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// What a transcript message is for. Only `RegularChat` entries count toward
/// the volume gates and are replayed into conversation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    #[default]
    RegularChat,
    AssessmentStart,
    PracticeTestQuestion,
    ModeResult,
    ModeToggleResult,
    UnitSelection,
    /// Engine-generated notices shown in the chat (volume warning, stopped
    /// response, apology). Never replayed to the model.
    SystemNotice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub description: String,
}

/// One entry of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub sender: Sender,
    pub content: String,
    #[serde(default)]
    pub is_html: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_attribution: Option<SourceAttribution>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub active_struggle_topic: Option<String>,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>, message_type: MessageType, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender,
            content: content.into(),
            is_html: false,
            timestamp,
            message_type,
            source_attribution: None,
            active_struggle_topic: None,
        }
    }

    pub fn user(content: impl Into<String>, message_type: MessageType, timestamp: DateTime<Utc>) -> Self {
        Self::new(Sender::User, content, message_type, timestamp)
    }

    pub fn bot(content: impl Into<String>, message_type: MessageType, timestamp: DateTime<Utc>) -> Self {
        Self::new(Sender::Bot, content, message_type, timestamp)
    }

    pub fn with_html(mut self, is_html: bool) -> Self {
        self.is_html = is_html;
        self
    }

    pub fn with_attribution(mut self, attribution: Option<SourceAttribution>) -> Self {
        self.source_attribution = attribution;
        self
    }

    pub fn with_struggle_topic(mut self, topic: Option<String>) -> Self {
        self.active_struggle_topic = topic;
        self
    }

    pub fn is_regular_chat(&self) -> bool {
        self.message_type == MessageType::RegularChat
    }
}

/// Role of a turn handed to the language model as history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of reconstructed conversation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub content: String,
}

impl ContextTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ============================================================================
// Struggle topics
// ============================================================================

/// A concept the backend reports the student as struggling with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StruggleTopic {
    pub topic: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub count: u32,
}

/// Struggle signals attached to a bot turn by the chat backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StruggleState {
    #[serde(default)]
    pub topics: Vec<StruggleTopic>,
}

// ============================================================================
// Assessment
// ============================================================================

/// The student's recorded answer to one calibration question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub question_index: usize,
    pub raw_answer: RawAnswer,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ai_feedback: Option<String>,
}

/// The calibration run of the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub questions: Vec<Question>,
    pub pass_threshold: u32,
    #[serde(default)]
    pub current_question_index: usize,
}

// ============================================================================
// Session record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub student_id: String,
    #[serde(default)]
    pub student_name: String,
    pub course_id: String,
    #[serde(default)]
    pub course_name: String,
    pub unit_name: String,
    #[serde(default)]
    pub current_mode: Mode,
    #[serde(default)]
    pub total_messages: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub export_timestamp: Option<DateTime<Utc>>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Set once the message-volume warning has been injected this session
    #[serde(default)]
    pub warning_shown: bool,
    /// Set once the reflection prompt has been appended this session
    #[serde(default)]
    pub reflection_prompt_shown: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_manual_mode_change: Option<DateTime<Utc>>,
    /// Struggle topic in directive mode as of the latest bot turn or reset
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub active_struggle_topic: Option<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end, filled in when the session is closed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<i64>,
}

/// The unit of persistence: one per student, overwritten in place.
///
/// A stored record without `messages` is malformed and fails to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub metadata: SessionMetadata,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub assessment: Option<AssessmentRecord>,
    #[serde(default)]
    pub student_answers: Vec<Option<AnsweredQuestion>>,
    pub session_info: SessionInfo,
    pub last_activity_timestamp: DateTime<Utc>,
}

impl SessionRecord {
    /// Create an empty record for a student in the given course and unit
    pub fn new(
        student: &StudentIdentity,
        selection: &CourseSelection,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: SessionMetadata {
                student_id: student.student_id.clone(),
                student_name: student.student_name.clone(),
                course_id: selection.course_id.clone(),
                course_name: selection.course_name.clone(),
                unit_name: selection.unit_name.clone(),
                current_mode: Mode::default(),
                total_messages: 0,
                export_timestamp: None,
                schema_version: SCHEMA_VERSION,
                warning_shown: false,
                reflection_prompt_shown: false,
                last_manual_mode_change: None,
                active_struggle_topic: None,
            },
            messages: Vec::new(),
            assessment: None,
            student_answers: Vec::new(),
            session_info: SessionInfo {
                session_id: session_id.into(),
                start_time: now,
                end_time: None,
                duration: None,
            },
            last_activity_timestamp: now,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_info.session_id
    }

    pub fn selection(&self) -> CourseSelection {
        CourseSelection {
            course_id: self.metadata.course_id.clone(),
            course_name: self.metadata.course_name.clone(),
            unit_name: self.metadata.unit_name.clone(),
        }
    }

    /// Number of questions with a recorded answer, regardless of the stored index
    pub fn answered_count(&self) -> usize {
        self.student_answers.iter().filter(|a| a.is_some()).count()
    }

    /// True when there is nothing worth resuming: no transcript and no answers
    pub fn is_blank(&self) -> bool {
        self.messages.is_empty() && self.answered_count() == 0
    }

    /// Stamp end time and duration on the session info
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.session_info.end_time = Some(now);
        self.session_info.duration = Some((now - self.session_info.start_time).num_seconds().max(0));
    }
}

/// An archived session in the bounded per-student history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_id: String,
    pub course_id: String,
    #[serde(default)]
    pub course_name: String,
    pub unit_name: String,
    pub mode: Mode,
    pub message_count: usize,
    pub archived_at: DateTime<Utc>,
    pub record: SessionRecord,
}

impl HistoryEntry {
    pub fn from_record(record: SessionRecord, archived_at: DateTime<Utc>) -> Self {
        Self {
            session_id: record.session_info.session_id.clone(),
            course_id: record.metadata.course_id.clone(),
            course_name: record.metadata.course_name.clone(),
            unit_name: record.metadata.unit_name.clone(),
            mode: record.metadata.current_mode,
            message_count: record.messages.len(),
            archived_at,
            record,
        }
    }
}
