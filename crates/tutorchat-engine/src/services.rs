//! Collaborator interfaces the engine depends on.
//!
//! Every method is async and runs on the host's single-threaded loop, hence
//! `?Send`. Implementations live with the host: the browser crate speaks HTTP,
//! tests use scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tutorchat_types::{ContextTurn, Mode, Question, SessionRecord, SourceAttribution, StruggleState};

/// One chat turn sent to the tutoring backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub mode: Mode,
    pub course_id: String,
    pub unit_name: String,
    pub student_id: String,
    pub student_name: String,
    pub session_id: String,
    /// Conversation so far, rebuilt from the record; `None` when the session
    /// changed underneath the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ContextTurn>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_attribution: Option<SourceAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struggle_state: Option<StruggleState>,
}

#[async_trait(?Send)]
pub trait ChatCompletionService {
    async fn send(&self, request: ChatRequest) -> anyhow::Result<ChatReply>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    pub correct: bool,
    #[serde(default)]
    pub feedback: String,
}

#[async_trait(?Send)]
pub trait AnswerGradingService {
    async fn check(&self, question: &str, answer: &str, expected: &str) -> anyhow::Result<GradingResult>;
}

/// Full-snapshot upload of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub session_id: String,
    pub course_id: String,
    pub student_id: String,
    pub unit_name: String,
    pub chat_data: SessionRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAck {
    pub success: bool,
}

#[async_trait(?Send)]
pub trait RemoteSessionStore {
    async fn save(&self, payload: SyncPayload) -> anyhow::Result<SaveAck>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetAck {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[async_trait(?Send)]
pub trait StruggleTopicService {
    async fn reset(&self, topic: &str, course_id: &str) -> anyhow::Result<ResetAck>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub name: String,
    #[serde(default = "default_published")]
    pub published: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<u32>,
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub units: Vec<Unit>,
}

impl Course {
    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn published_units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.published)
    }
}

#[async_trait(?Send)]
pub trait CourseCatalog {
    async fn course(&self, course_id: &str) -> anyhow::Result<Option<Course>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_tolerates_missing_fields() {
        let reply: ChatReply = serde_json::from_value(json!({"success": false})).unwrap();
        assert!(!reply.success);
        assert!(reply.message.is_empty());
        assert!(reply.struggle_state.is_none());
    }

    #[test]
    fn test_course_units_default_to_published() {
        let course: Course = serde_json::from_value(json!({
            "id": "bio",
            "units": [
                {"name": "Cells", "questions": [{"type": "true-false", "text": "x", "correctAnswer": true}]},
                {"name": "Draft", "published": false}
            ]
        }))
        .unwrap();
        let names: Vec<_> = course.published_units().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Cells"]);
        assert_eq!(course.unit("Cells").unwrap().questions.len(), 1);
    }
}
