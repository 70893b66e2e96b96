//! Session continuity and calibration engine for tutorchat
//!
//! This crate owns the learner's session state: local-first persistence with
//! best-effort remote sync, the resume-or-start-fresh decision, the chat
//! transcript and its one-shot gates, conversation context reconstruction,
//! the calibration assessment that selects tutor or protégé mode, and the
//! struggle-topic gate. Hosts plug in storage, timers and backend services
//! through the traits in [`storage`], [`runtime`] and [`services`].

pub mod assessment;
pub mod config;
pub mod context;
pub mod continuity;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod services;
pub mod session;
pub mod storage;
pub mod store;
pub mod struggle;
pub mod sync;
pub mod transcript;

// Re-export commonly used types
pub use assessment::{AssessmentEngine, AssessmentOutcome, AssessmentState};
pub use config::EngineConfig;
pub use context::build_context;
pub use continuity::{ContinuityDecision, SessionContinuityManager};
pub use error::{AssessmentError, ConfigError, EngineError, StorageError, StoreError, StruggleError};
pub use logging::safe_truncate;
pub use runtime::{Clock, Executor, SystemClock};
pub use session::{AnswerOutcome, ChatTurnOutcome, SessionDeps, TutorSession};
pub use storage::{JsonFileStorage, KeyValueStorage, MemoryStorage};
pub use store::PersistedSessionStore;
pub use struggle::StruggleGate;
pub use sync::RemoteSyncAgent;
pub use transcript::ChatTranscript;
