use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use gloo_net::http::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;

use tutorchat_engine::services::{
    AnswerGradingService, ChatCompletionService, ChatReply, ChatRequest, Course, CourseCatalog, GradingResult,
    RemoteSessionStore, ResetAck, SaveAck, StruggleTopicService, SyncPayload,
};

use crate::protocol::{CheckAnswerRequest, StruggleResetRequest};
use crate::utils::join_url;

/// The tutoring backend over HTTP/JSON
#[derive(Debug, Clone, Default)]
pub struct HttpBackend {
    base_url: String,
}

impl HttpBackend {
    /// `base_url` may be empty to use paths relative to the page's origin
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.url(path);
        log::debug!("POST {}", url);
        let response = Request::post(&url)
            .json(body)
            .map_err(|e| anyhow!("Failed to serialize request for {}: {}", path, e))?
            .send()
            .await
            .map_err(|e| anyhow!("Request to {} failed: {}", url, e))?;
        if !response.ok() {
            bail!("{} returned HTTP {}", path, response.status());
        }
        response
            .json::<R>()
            .await
            .map_err(|e| anyhow!("Failed to parse response from {}: {}", path, e))
    }
}

#[async_trait(?Send)]
impl ChatCompletionService for HttpBackend {
    async fn send(&self, request: ChatRequest) -> Result<ChatReply> {
        self.post_json("/api/chat", &request).await
    }
}

#[async_trait(?Send)]
impl AnswerGradingService for HttpBackend {
    async fn check(&self, question: &str, answer: &str, expected: &str) -> Result<GradingResult> {
        let body = CheckAnswerRequest {
            question: question.to_string(),
            student_answer: answer.to_string(),
            expected_answer: expected.to_string(),
        };
        self.post_json("/api/check-answer", &body).await
    }
}

#[async_trait(?Send)]
impl RemoteSessionStore for HttpBackend {
    async fn save(&self, payload: SyncPayload) -> Result<SaveAck> {
        self.post_json("/api/chat-sessions", &payload).await
    }
}

#[async_trait(?Send)]
impl StruggleTopicService for HttpBackend {
    async fn reset(&self, topic: &str, course_id: &str) -> Result<ResetAck> {
        let body = StruggleResetRequest {
            topic: topic.to_string(),
            course_id: course_id.to_string(),
        };
        self.post_json("/api/struggle/reset", &body).await
    }
}

#[async_trait(?Send)]
impl CourseCatalog for HttpBackend {
    async fn course(&self, course_id: &str) -> Result<Option<Course>> {
        let encoded = String::from(js_sys::encode_uri_component(course_id));
        let url = self.url(&format!("/api/courses/{}", encoded));
        let response = Request::get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Request to {} failed: {}", url, e))?;
        match response.status() {
            404 => Ok(None),
            status if !response.ok() => bail!("Course lookup for {} returned HTTP {}", course_id, status),
            _ => response
                .json::<Course>()
                .await
                .map(Some)
                .map_err(|e| anyhow!("Failed to parse course {}: {}", course_id, e)),
        }
    }
}
