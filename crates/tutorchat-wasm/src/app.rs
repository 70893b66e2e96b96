use std::rc::Rc;

use js_sys::Promise;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use tutorchat_engine::{EngineConfig, SessionDeps, SystemClock, TutorSession};
use tutorchat_types::{CourseSelection, RawAnswer};

use crate::executor::BrowserExecutor;
use crate::http::HttpBackend;
use crate::protocol::{AnswerView, ChatTurnView, OpenOptions, QuestionView, SessionSnapshot};
use crate::storage::LocalStorage;
use crate::utils::to_js_error;

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(to_js_error)
}

fn resolve_config(options: &OpenOptions) -> Result<EngineConfig, JsValue> {
    match (&options.config, &options.config_toml) {
        (Some(config), _) => Ok(config.clone()),
        (None, Some(toml)) => EngineConfig::from_toml_str(toml).map_err(to_js_error),
        (None, None) => Ok(EngineConfig::default()),
    }
}

/// One student's tutoring session, bound to the page's localStorage and the
/// tutoring backend. Every method returns JSON text; async ones return a
/// Promise of it.
#[wasm_bindgen]
pub struct TutorChat {
    session: Rc<TutorSession>,
}

#[wasm_bindgen]
impl TutorChat {
    /// `options` is the JSON form of [`OpenOptions`]
    #[wasm_bindgen(constructor)]
    pub fn new(options: &str) -> Result<TutorChat, JsValue> {
        let options: OpenOptions = serde_json::from_str(options).map_err(to_js_error)?;
        let config = resolve_config(&options)?;
        let backend = Rc::new(HttpBackend::new(options.base_url.clone()));
        let deps = SessionDeps {
            config,
            storage: Rc::new(LocalStorage::new().map_err(to_js_error)?),
            clock: Rc::new(SystemClock),
            executor: Rc::new(BrowserExecutor),
            chat: backend.clone(),
            grader: backend.clone(),
            remote: backend.clone(),
            struggle: backend.clone(),
            catalog: backend,
        };
        let session = TutorSession::open(deps, options.student, options.selection).map_err(to_js_error)?;
        log::info!("Opened tutoring session {} ({:?})", session.session_id(), session.decision());
        Ok(TutorChat {
            session: Rc::new(session),
        })
    }

    #[wasm_bindgen(js_name = sessionId)]
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    pub fn snapshot(&self) -> Result<String, JsValue> {
        let snapshot = SessionSnapshot::new(
            self.session.decision(),
            self.session.record(),
            self.session.active_struggle_topic(),
        );
        to_json(&snapshot)
    }

    #[wasm_bindgen(js_name = sendMessage)]
    pub fn send_message(&self, text: String) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let outcome = session.send_message(&text).await;
            to_json(&ChatTurnView::from(outcome)).map(JsValue::from)
        })
    }

    /// Start the calibration assessment of the current unit. Resolves to
    /// `false` when the unit has no usable questions.
    #[wasm_bindgen(js_name = startAssessment)]
    pub fn start_assessment(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let started = session.start_assessment_for_unit().await.map_err(to_js_error)?;
            Ok(JsValue::from_bool(started))
        })
    }

    #[wasm_bindgen(js_name = answerChoice)]
    pub fn answer_choice(&self, index: usize, option: usize) -> Promise {
        self.answer(index, RawAnswer::Choice(option))
    }

    #[wasm_bindgen(js_name = answerText)]
    pub fn answer_text(&self, index: usize, text: String) -> Promise {
        self.answer(index, RawAnswer::Text(text))
    }

    /// Returns the new mode, or `undefined` while an assessment is running
    #[wasm_bindgen(js_name = toggleMode)]
    pub fn toggle_mode(&self) -> Option<String> {
        self.session.toggle_mode().map(|mode| mode.as_str().to_string())
    }

    #[wasm_bindgen(js_name = resetStruggleTopic)]
    pub fn reset_struggle_topic(&self) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let message = session.reset_struggle_topic().await.map_err(to_js_error)?;
            Ok(JsValue::from_str(&message))
        })
    }

    /// Archive the current session and begin a new one. Returns the new id.
    #[wasm_bindgen(js_name = newSession)]
    pub fn new_session(&self) -> String {
        self.session.new_session()
    }

    /// `selection` is a JSON `CourseSelection`
    #[wasm_bindgen(js_name = selectUnit)]
    pub fn select_unit(&self, selection: &str) -> Result<bool, JsValue> {
        let selection: CourseSelection = serde_json::from_str(selection).map_err(to_js_error)?;
        Ok(self.session.select_unit(selection))
    }

    pub fn history(&self) -> Result<String, JsValue> {
        to_json(&self.session.history())
    }

    pub fn export(&self) -> Result<String, JsValue> {
        self.session.export().map_err(to_js_error)
    }

    /// Re-read the stored session, e.g. after another tab wrote it
    pub fn refresh(&self) -> bool {
        self.session.refresh_from_store()
    }

    /// The conversation context the next chat request would carry
    pub fn context(&self) -> Result<String, JsValue> {
        to_json(&self.session.conversation_context())
    }
}

impl TutorChat {
    fn answer(&self, index: usize, answer: RawAnswer) -> Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let outcome = session.answer_question(index, answer).await;
            let next = QuestionView::current(&session.record());
            to_json(&AnswerView::new(outcome, next)).map(JsValue::from)
        })
    }
}
