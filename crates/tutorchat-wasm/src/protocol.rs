use serde::{Deserialize, Serialize};

use tutorchat_engine::{AnswerOutcome, ChatTurnOutcome, ContinuityDecision, EngineConfig};
use tutorchat_types::{CourseSelection, Message, Mode, Question, SessionRecord, StudentIdentity};

/// Options the page passes when opening a session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    pub student: StudentIdentity,
    #[serde(default)]
    pub selection: Option<CourseSelection>,
    /// Backend origin; empty for the page's own origin
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub config: Option<EngineConfig>,
    /// Alternative to `config` for hosts that ship TOML
    #[serde(default)]
    pub config_toml: Option<String>,
}

/// Body of `POST /api/check-answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerRequest {
    pub question: String,
    pub student_answer: String,
    pub expected_answer: String,
}

/// Body of `POST /api/struggle/reset`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StruggleResetRequest {
    pub topic: String,
    pub course_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: String,
    /// Option labels for choice questions, empty otherwise
    pub options: Vec<String>,
}

impl QuestionView {
    pub fn new(index: usize, total: usize, question: &Question) -> Self {
        Self {
            index,
            total,
            text: question.text.clone(),
            question_type: question.type_name().to_string(),
            options: question.choice_labels(),
        }
    }

    /// The question the running assessment is waiting on, if any
    pub fn current(record: &SessionRecord) -> Option<Self> {
        let assessment = record.assessment.as_ref()?;
        let index = assessment.current_question_index;
        assessment
            .questions
            .get(index)
            .map(|q| Self::new(index, assessment.questions.len(), q))
    }
}

/// State the page renders from after opening or any action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub resumed: bool,
    pub mode: Mode,
    pub active_struggle_topic: Option<String>,
    pub current_question: Option<QuestionView>,
    pub record: SessionRecord,
}

impl SessionSnapshot {
    pub fn new(decision: ContinuityDecision, record: SessionRecord, active_struggle_topic: Option<String>) -> Self {
        let current_question = QuestionView::current(&record);
        Self {
            session_id: record.session_id().to_string(),
            resumed: decision == ContinuityDecision::Resume,
            mode: record.metadata.current_mode,
            active_struggle_topic,
            current_question,
            record,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ChatTurnView {
    Replied { message: Message },
    Failed { message: Message },
    Cancelled,
}

impl From<ChatTurnOutcome> for ChatTurnView {
    fn from(outcome: ChatTurnOutcome) -> Self {
        match outcome {
            ChatTurnOutcome::Replied(message) => ChatTurnView::Replied { message },
            ChatTurnOutcome::Failed(message) => ChatTurnView::Failed { message },
            ChatTurnOutcome::Cancelled => ChatTurnView::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AnswerView {
    Ignored,
    #[serde(rename_all = "camelCase")]
    Answered {
        index: usize,
        is_correct: Option<bool>,
        feedback: Option<String>,
        next_question: Option<QuestionView>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        index: usize,
        is_correct: Option<bool>,
        total_correct: usize,
        total_questions: usize,
        pass_threshold: u32,
        passed: bool,
        mode: Mode,
    },
}

impl AnswerView {
    pub fn new(outcome: AnswerOutcome, next_question: Option<QuestionView>) -> Self {
        match outcome {
            AnswerOutcome::Ignored => AnswerView::Ignored,
            AnswerOutcome::Answered { index, is_correct, feedback } => AnswerView::Answered {
                index,
                is_correct,
                feedback,
                next_question,
            },
            AnswerOutcome::Completed { index, is_correct, outcome } => AnswerView::Completed {
                index,
                is_correct,
                total_correct: outcome.total_correct,
                total_questions: outcome.total_questions,
                pass_threshold: outcome.pass_threshold,
                passed: outcome.passed,
                mode: outcome.mode,
            },
        }
    }
}
