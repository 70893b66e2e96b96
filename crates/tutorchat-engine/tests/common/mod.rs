#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use serde_json::json;

use tutorchat_engine::services::{
    AnswerGradingService, ChatCompletionService, ChatReply, ChatRequest, Course, CourseCatalog, GradingResult,
    RemoteSessionStore, ResetAck, SaveAck, StruggleTopicService, SyncPayload,
};
use tutorchat_engine::{Clock, EngineConfig, EngineError, Executor, MemoryStorage, SessionDeps, TutorSession};
use tutorchat_types::{CourseSelection, Question, StruggleState, StruggleTopic, StudentIdentity};

/// Clock that only moves when told to
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Cell::new(start) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

/// Runs spawned tasks to completion on the spot; timers use tokio
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        futures::executor::block_on(task);
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

pub enum ScriptedReply {
    Reply(ChatReply),
    Fail(&'static str),
    /// Resolves when the test sends on the paired channel
    Wait(oneshot::Receiver<ChatReply>),
}

/// Chat service answering from a script, then echoing
#[derive(Default)]
pub struct ScriptedChat {
    script: RefCell<VecDeque<ScriptedReply>>,
    pub requests: RefCell<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn push(&self, reply: ScriptedReply) {
        self.script.borrow_mut().push_back(reply);
    }

    pub fn push_wait(&self) -> oneshot::Sender<ChatReply> {
        let (tx, rx) = oneshot::channel();
        self.push(ScriptedReply::Wait(rx));
        tx
    }
}

pub fn reply(text: &str) -> ChatReply {
    ChatReply {
        success: true,
        message: text.to_string(),
        source_attribution: None,
        struggle_state: None,
    }
}

pub fn struggling(text: &str, topic: &str, is_active: bool) -> ChatReply {
    ChatReply {
        struggle_state: Some(StruggleState {
            topics: vec![StruggleTopic { topic: topic.to_string(), is_active, count: 2 }],
        }),
        ..reply(text)
    }
}

#[async_trait(?Send)]
impl ChatCompletionService for ScriptedChat {
    async fn send(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let echo = format!("echo: {}", request.message);
        self.requests.borrow_mut().push(request);
        let next = self.script.borrow_mut().pop_front();
        match next {
            Some(ScriptedReply::Reply(reply)) => Ok(reply),
            Some(ScriptedReply::Fail(reason)) => anyhow::bail!("{}", reason),
            Some(ScriptedReply::Wait(rx)) => Ok(rx.await?),
            None => Ok(reply(&echo)),
        }
    }
}

pub enum GraderMode {
    Verdict(bool),
    Fail,
    Hang,
}

pub struct ScriptedGrader {
    pub mode: RefCell<GraderMode>,
    pub calls: Cell<usize>,
}

impl ScriptedGrader {
    pub fn new(mode: GraderMode) -> Self {
        Self { mode: RefCell::new(mode), calls: Cell::new(0) }
    }

    pub fn set(&self, mode: GraderMode) {
        *self.mode.borrow_mut() = mode;
    }
}

#[async_trait(?Send)]
impl AnswerGradingService for ScriptedGrader {
    async fn check(&self, _question: &str, _answer: &str, _expected: &str) -> anyhow::Result<GradingResult> {
        self.calls.set(self.calls.get() + 1);
        let verdict = match &*self.mode.borrow() {
            GraderMode::Verdict(correct) => Some(*correct),
            GraderMode::Fail => anyhow::bail!("grading service unavailable"),
            GraderMode::Hang => None,
        };
        match verdict {
            Some(correct) => Ok(GradingResult { correct, feedback: "Checked.".to_string() }),
            None => futures::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingRemote {
    pub saved: RefCell<Vec<SyncPayload>>,
    pub fail: Cell<bool>,
}

#[async_trait(?Send)]
impl RemoteSessionStore for RecordingRemote {
    async fn save(&self, payload: SyncPayload) -> anyhow::Result<SaveAck> {
        if self.fail.get() {
            anyhow::bail!("server unreachable");
        }
        self.saved.borrow_mut().push(payload);
        Ok(SaveAck { success: true })
    }
}

pub struct ScriptedStruggle {
    pub succeed: Cell<bool>,
    pub resets: RefCell<Vec<(String, String)>>,
}

#[async_trait(?Send)]
impl StruggleTopicService for ScriptedStruggle {
    async fn reset(&self, topic: &str, course_id: &str) -> anyhow::Result<ResetAck> {
        self.resets.borrow_mut().push((topic.to_string(), course_id.to_string()));
        if self.succeed.get() {
            Ok(ResetAck { success: true, message: String::new() })
        } else {
            anyhow::bail!("reset endpoint returned 500")
        }
    }
}

#[derive(Default)]
pub struct StaticCatalog {
    pub courses: RefCell<Vec<Course>>,
}

#[async_trait(?Send)]
impl CourseCatalog for StaticCatalog {
    async fn course(&self, course_id: &str) -> anyhow::Result<Option<Course>> {
        Ok(self.courses.borrow().iter().find(|c| c.id == course_id).cloned())
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn student() -> StudentIdentity {
    StudentIdentity { student_id: "s1".into(), student_name: "Ada".into() }
}

pub fn cells() -> CourseSelection {
    CourseSelection { course_id: "bio".into(), course_name: "Biology".into(), unit_name: "Cells".into() }
}

pub fn genes() -> CourseSelection {
    CourseSelection { unit_name: "Genes".into(), ..cells() }
}

/// True/false, multiple choice and short answer, in that order
pub fn questions() -> Vec<Question> {
    serde_json::from_value(json!([
        {"id": 1, "type": "true-false", "question": "Cells have membranes.", "correctAnswer": "True", "unitName": "Cells"},
        {"id": 2, "type": "multiple-choice", "question": "Which is a fruit?", "options": {"A": "Mango", "B": "Apple"}, "correctAnswer": "B", "unitName": "Cells"},
        {"id": 3, "type": "short-answer", "question": "What is osmosis?", "correctAnswer": "diffusion of water", "unitName": "Cells"}
    ]))
    .unwrap()
}

pub fn course(published: bool, pass_threshold: Option<u32>) -> Course {
    serde_json::from_value(json!({
        "id": "bio",
        "name": "Biology",
        "units": [{
            "name": "Cells",
            "published": published,
            "passThreshold": pass_threshold,
            "questions": serde_json::to_value(questions()).unwrap()
        }]
    }))
    .unwrap()
}

/// Shared fakes; opening several sessions on one harness simulates reloads
pub struct Harness {
    pub storage: Rc<MemoryStorage>,
    pub clock: Rc<ManualClock>,
    pub chat: Rc<ScriptedChat>,
    pub grader: Rc<ScriptedGrader>,
    pub remote: Rc<RecordingRemote>,
    pub struggle: Rc<ScriptedStruggle>,
    pub catalog: Rc<StaticCatalog>,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            storage: Rc::new(MemoryStorage::new()),
            clock: Rc::new(ManualClock::new(t0())),
            chat: Rc::new(ScriptedChat::default()),
            grader: Rc::new(ScriptedGrader::new(GraderMode::Verdict(true))),
            remote: Rc::new(RecordingRemote::default()),
            struggle: Rc::new(ScriptedStruggle { succeed: Cell::new(true), resets: RefCell::new(Vec::new()) }),
            catalog: Rc::new(StaticCatalog::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            config: self.config.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            executor: Rc::new(InlineExecutor),
            chat: self.chat.clone(),
            grader: self.grader.clone(),
            remote: self.remote.clone(),
            struggle: self.struggle.clone(),
            catalog: self.catalog.clone(),
        }
    }

    pub fn open_for(&self, selection: Option<CourseSelection>) -> Result<TutorSession, EngineError> {
        TutorSession::open(self.deps(), student(), selection)
    }

    pub fn open(&self) -> TutorSession {
        self.open_for(Some(cells())).unwrap()
    }
}
