//! Calibration state machine.
//!
//! All state lives in the [`SessionRecord`]: the engine holds only its
//! collaborators and tunables, so a record restored from storage picks up
//! exactly where it was left.
//!
//! ```text
//! NotStarted --start--> InProgress(0) --answer--> InProgress(i+1) ... --> Completed
//! ```
//!
//! Choice answers advance immediately. A short answer is recorded first and
//! advances once grading resolves, so the answer itself is durable even if
//! the grading call never returns.

use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use tutorchat_types::{AnsweredQuestion, AssessmentRecord, Mode, Question, QuestionKind, RawAnswer, SessionRecord};

use crate::error::AssessmentError;
use crate::runtime::{with_timeout, Executor};
use crate::services::AnswerGradingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentState {
    NotStarted,
    /// Index of the next unanswered question
    InProgress(usize),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentOutcome {
    pub total_correct: usize,
    pub total_questions: usize,
    pub pass_threshold: u32,
    pub passed: bool,
    pub mode: Mode,
}

/// What the caller must do after an answer has been recorded
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerTicket {
    /// Graded on the spot and the assessment has advanced
    Graded { index: usize, is_correct: bool },
    /// Recorded but waiting on [`AssessmentEngine::grade`] and
    /// [`AssessmentEngine::apply_grading`] before advancing
    NeedsGrading { index: usize, question: Question, answer: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradingOutcome {
    Graded { correct: bool, feedback: String },
    /// The grader failed or timed out; scoring falls back to the length heuristic
    Unavailable,
}

pub struct AssessmentEngine {
    grader: Rc<dyn AnswerGradingService>,
    executor: Rc<dyn Executor>,
    grading_timeout: Duration,
    short_answer_min_len: usize,
}

impl AssessmentEngine {
    pub fn new(
        grader: Rc<dyn AnswerGradingService>,
        executor: Rc<dyn Executor>,
        grading_timeout: Duration,
        short_answer_min_len: usize,
    ) -> Self {
        Self {
            grader,
            executor,
            grading_timeout,
            short_answer_min_len,
        }
    }

    pub fn state(record: &SessionRecord) -> AssessmentState {
        match &record.assessment {
            None => AssessmentState::NotStarted,
            Some(a) if a.current_question_index >= a.questions.len() => AssessmentState::Completed,
            Some(a) => AssessmentState::InProgress(a.current_question_index),
        }
    }

    pub fn current_question(record: &SessionRecord) -> Option<(usize, &Question)> {
        match Self::state(record) {
            AssessmentState::InProgress(i) => record.assessment.as_ref().map(|a| (i, &a.questions[i])),
            _ => None,
        }
    }

    /// Begin a new calibration run, discarding any previous answers. The
    /// threshold is clamped to the number of questions. Returns the effective
    /// threshold.
    pub fn start(
        &self,
        record: &mut SessionRecord,
        questions: Vec<Question>,
        pass_threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, AssessmentError> {
        if questions.is_empty() {
            return Err(AssessmentError::NoQuestions);
        }
        let pass_threshold = pass_threshold.min(questions.len() as u32);
        record.student_answers = vec![None; questions.len()];
        record.assessment = Some(AssessmentRecord {
            questions,
            pass_threshold,
            current_question_index: 0,
        });
        record.last_activity_timestamp = now;
        log::info!(
            "Assessment started with {} questions, pass threshold {}",
            record.student_answers.len(),
            pass_threshold
        );
        Ok(pass_threshold)
    }

    /// Record the student's answer to question `index`
    pub fn record_answer(
        &self,
        record: &mut SessionRecord,
        index: usize,
        answer: RawAnswer,
        now: DateTime<Utc>,
    ) -> Result<AnswerTicket, AssessmentError> {
        let assessment = record.assessment.as_ref().ok_or(AssessmentError::NotStarted)?;
        let current = assessment.current_question_index;
        if current >= assessment.questions.len() {
            return Err(AssessmentError::AlreadyComplete);
        }
        if record.student_answers.len() < assessment.questions.len() {
            record.student_answers.resize(assessment.questions.len(), None);
        }
        if index != current {
            return Err(match record.student_answers.get(index) {
                Some(Some(_)) => AssessmentError::AlreadyAnswered(index),
                _ => AssessmentError::OutOfOrder { expected: current, got: index },
            });
        }
        if record.student_answers[index].is_some() {
            // Waiting on grading
            return Err(AssessmentError::AlreadyAnswered(index));
        }

        let question = &assessment.questions[index];
        let ticket = match (&question.kind, &answer) {
            (QuestionKind::TrueFalse { .. } | QuestionKind::MultipleChoice { .. }, RawAnswer::Choice(option)) => {
                if *option >= question.choice_labels().len() {
                    return Err(AssessmentError::InvalidOption { index, option: *option });
                }
                let is_correct = question.evaluate_choice(*option).unwrap_or(false);
                AnswerTicket::Graded { index, is_correct }
            }
            (QuestionKind::TrueFalse { .. } | QuestionKind::MultipleChoice { .. }, RawAnswer::Text(_)) => {
                return Err(AssessmentError::WrongAnswerShape { index, expected: "an option index" });
            }
            (QuestionKind::ShortAnswer { .. }, RawAnswer::Text(text)) => AnswerTicket::NeedsGrading {
                index,
                question: question.clone(),
                answer: text.clone(),
            },
            (QuestionKind::ShortAnswer { .. }, RawAnswer::Choice(_)) => {
                return Err(AssessmentError::WrongAnswerShape { index, expected: "a text answer" });
            }
            (QuestionKind::Other { .. }, answer) => AnswerTicket::Graded {
                index,
                is_correct: question.evaluate_direct(answer),
            },
        };

        let is_correct = match &ticket {
            AnswerTicket::Graded { is_correct, .. } => Some(*is_correct),
            AnswerTicket::NeedsGrading { .. } => None,
        };
        record.student_answers[index] = Some(AnsweredQuestion {
            question_index: index,
            raw_answer: answer,
            is_correct,
            ai_feedback: None,
        });
        if is_correct.is_some() {
            self.advance(record);
        }
        record.last_activity_timestamp = now;
        Ok(ticket)
    }

    /// Ask the grading service about a short answer. Never fails: errors and
    /// timeouts come back as [`GradingOutcome::Unavailable`].
    pub async fn grade(&self, question: &Question, answer: &str) -> GradingOutcome {
        let expected = question.correct_answer_label();
        let call = self.grader.check(&question.text, answer, &expected);
        match with_timeout(self.executor.as_ref(), self.grading_timeout, call).await {
            Some(Ok(result)) => GradingOutcome::Graded {
                correct: result.correct,
                feedback: result.feedback,
            },
            Some(Err(e)) => {
                log::warn!("Answer grading failed, using length heuristic: {:#}", e);
                GradingOutcome::Unavailable
            }
            None => {
                log::warn!(
                    "Answer grading timed out after {:?}, using length heuristic",
                    self.grading_timeout
                );
                GradingOutcome::Unavailable
            }
        }
    }

    /// Store the grading outcome of the pending short answer at `index` and advance
    pub fn apply_grading(
        &self,
        record: &mut SessionRecord,
        index: usize,
        outcome: GradingOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), AssessmentError> {
        let assessment = record.assessment.as_ref().ok_or(AssessmentError::NotStarted)?;
        if assessment.current_question_index != index {
            return Err(AssessmentError::OutOfOrder {
                expected: assessment.current_question_index,
                got: index,
            });
        }
        let answered = record
            .student_answers
            .get_mut(index)
            .and_then(|a| a.as_mut())
            .ok_or(AssessmentError::OutOfOrder { expected: index, got: index })?;
        if answered.is_correct.is_some() {
            return Err(AssessmentError::AlreadyAnswered(index));
        }
        if let GradingOutcome::Graded { correct, feedback } = outcome {
            answered.is_correct = Some(correct);
            answered.ai_feedback = Some(feedback);
        }
        self.advance(record);
        record.last_activity_timestamp = now;
        Ok(())
    }

    fn advance(&self, record: &mut SessionRecord) {
        if let Some(assessment) = record.assessment.as_mut() {
            assessment.current_question_index = (assessment.current_question_index + 1).min(assessment.questions.len());
        }
    }

    fn heuristic(&self, text: &str) -> bool {
        text.trim().chars().count() > self.short_answer_min_len
    }

    /// Score one answer with the rules of its question type
    pub fn evaluate(&self, question: &Question, answered: &AnsweredQuestion) -> bool {
        match (&question.kind, &answered.raw_answer) {
            (QuestionKind::TrueFalse { .. } | QuestionKind::MultipleChoice { .. }, RawAnswer::Choice(i)) => {
                question.evaluate_choice(*i).unwrap_or(false)
            }
            (QuestionKind::ShortAnswer { .. }, answer) => answered
                .is_correct
                .unwrap_or_else(|| self.heuristic(&answer.as_text())),
            (_, answer) => question.evaluate_direct(answer),
        }
    }

    /// Score every recorded answer; unanswered questions count as wrong
    pub fn total_correct(&self, record: &SessionRecord) -> usize {
        let Some(assessment) = &record.assessment else {
            return 0;
        };
        assessment
            .questions
            .iter()
            .zip(record.student_answers.iter())
            .filter(|(question, answered)| match answered {
                Some(answered) => self.evaluate(question, answered),
                None => false,
            })
            .count()
    }

    /// Score a completed assessment and make the resulting mode current.
    /// Returns `None` while questions remain.
    pub fn finish(&self, record: &mut SessionRecord) -> Option<AssessmentOutcome> {
        if Self::state(record) != AssessmentState::Completed {
            return None;
        }
        let assessment = record.assessment.as_ref()?;
        let total_correct = self.total_correct(record);
        let passed = total_correct >= assessment.pass_threshold as usize;
        let outcome = AssessmentOutcome {
            total_correct,
            total_questions: assessment.questions.len(),
            pass_threshold: assessment.pass_threshold,
            passed,
            mode: if passed { Mode::Protege } else { Mode::Tutor },
        };
        record.metadata.current_mode = outcome.mode;
        log::info!(
            "Assessment complete: {}/{} correct (threshold {}), mode {}",
            outcome.total_correct,
            outcome.total_questions,
            outcome.pass_threshold,
            outcome.mode
        );
        Some(outcome)
    }
}

/// Bot text presenting question `index`
pub fn question_prompt(index: usize, total: usize, question: &Question) -> String {
    let mut text = format!("Question {} of {}: {}", index + 1, total, question.text);
    for (i, label) in question.choice_labels().iter().enumerate() {
        let key = match &question.kind {
            QuestionKind::MultipleChoice { options, .. } => options[i].key.clone(),
            _ => (i + 1).to_string(),
        };
        text.push_str(&format!("\n{}) {}", key, label));
    }
    text
}

/// Bot text announcing the result of an assessment
pub fn outcome_message(outcome: &AssessmentOutcome) -> String {
    let verdict = if outcome.passed {
        "You've shown a solid grasp of this unit, so we'll work in Protégé mode: you explain, and I'll ask questions."
    } else {
        "We'll work in Tutor mode so I can walk you through the key ideas of this unit."
    };
    format!(
        "You answered {} of {} questions correctly. {}",
        outcome.total_correct, outcome.total_questions, verdict
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::GradingResult;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::future::LocalBoxFuture;
    use serde_json::json;
    use std::cell::Cell;
    use tutorchat_types::{CourseSelection, StudentIdentity};

    struct FixedGrader {
        verdict: Option<bool>,
        calls: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl AnswerGradingService for FixedGrader {
        async fn check(&self, _question: &str, _answer: &str, _expected: &str) -> anyhow::Result<GradingResult> {
            self.calls.set(self.calls.get() + 1);
            match self.verdict {
                Some(correct) => Ok(GradingResult { correct, feedback: "graded".into() }),
                None => Err(anyhow::anyhow!("grader offline")),
            }
        }
    }

    struct NeverGrader;

    #[async_trait(?Send)]
    impl AnswerGradingService for NeverGrader {
        async fn check(&self, _question: &str, _answer: &str, _expected: &str) -> anyhow::Result<GradingResult> {
            futures::future::pending().await
        }
    }

    struct ImmediateTimer;

    impl Executor for ImmediateTimer {
        fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
            futures::executor::block_on(task);
        }

        fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    struct NeverTimer;

    impl Executor for NeverTimer {
        fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
            futures::executor::block_on(task);
        }

        fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
            Box::pin(futures::future::pending())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    fn engine(verdict: Option<bool>) -> AssessmentEngine {
        AssessmentEngine::new(
            Rc::new(FixedGrader { verdict, calls: Cell::new(0) }),
            Rc::new(NeverTimer),
            Duration::from_secs(20),
            10,
        )
    }

    fn record() -> SessionRecord {
        SessionRecord::new(
            &StudentIdentity { student_id: "s".into(), student_name: String::new() },
            &CourseSelection { course_id: "c".into(), course_name: String::new(), unit_name: "u".into() },
            "sid",
            now(),
        )
    }

    fn q(value: serde_json::Value) -> Question {
        serde_json::from_value(value).unwrap()
    }

    fn three_questions() -> Vec<Question> {
        vec![
            q(json!({"id": 1, "type": "true-false", "text": "Cells have membranes", "correctAnswer": "True"})),
            q(json!({"id": 2, "type": "multiple-choice", "text": "Fruit?", "options": {"A": "Mango", "B": "Apple"}, "correctAnswer": "B"})),
            q(json!({"id": 3, "type": "short-answer", "text": "Define osmosis", "correctAnswer": "water diffusion"})),
        ]
    }

    #[test]
    fn test_start_clamps_threshold() {
        let engine = engine(Some(true));
        let mut rec = record();
        let threshold = engine.start(&mut rec, three_questions(), 10, now()).unwrap();
        assert_eq!(threshold, 3);
        assert_eq!(rec.assessment.as_ref().unwrap().pass_threshold, 3);
        assert_eq!(rec.student_answers.len(), 3);
        assert_eq!(AssessmentEngine::state(&rec), AssessmentState::InProgress(0));
    }

    #[test]
    fn test_start_without_questions_is_rejected() {
        let engine = engine(Some(true));
        let mut rec = record();
        assert_eq!(engine.start(&mut rec, Vec::new(), 2, now()), Err(AssessmentError::NoQuestions));
        assert_eq!(AssessmentEngine::state(&rec), AssessmentState::NotStarted);
    }

    #[test]
    fn test_out_of_order_and_repeat_answers_rejected() {
        let engine = engine(Some(true));
        let mut rec = record();
        engine.start(&mut rec, three_questions(), 2, now()).unwrap();

        assert_eq!(
            engine.record_answer(&mut rec, 1, RawAnswer::Choice(1), now()),
            Err(AssessmentError::OutOfOrder { expected: 0, got: 1 })
        );
        engine.record_answer(&mut rec, 0, RawAnswer::Choice(0), now()).unwrap();
        assert_eq!(
            engine.record_answer(&mut rec, 0, RawAnswer::Choice(1), now()),
            Err(AssessmentError::AlreadyAnswered(0))
        );
        assert_eq!(
            engine.record_answer(&mut rec, 1, RawAnswer::Choice(7), now()),
            Err(AssessmentError::InvalidOption { index: 1, option: 7 })
        );
        assert_eq!(rec.answered_count(), 1);
    }

    #[test]
    fn test_answer_before_start_rejected() {
        let engine = engine(Some(true));
        let mut rec = record();
        assert_eq!(
            engine.record_answer(&mut rec, 0, RawAnswer::Choice(0), now()),
            Err(AssessmentError::NotStarted)
        );
    }

    #[test]
    fn test_short_answer_waits_for_grading() {
        let engine = engine(Some(false));
        let mut rec = record();
        engine.start(&mut rec, three_questions(), 2, now()).unwrap();
        engine.record_answer(&mut rec, 0, RawAnswer::Choice(0), now()).unwrap();
        engine.record_answer(&mut rec, 1, RawAnswer::Choice(1), now()).unwrap();

        let ticket = engine
            .record_answer(&mut rec, 2, RawAnswer::Text("water moving across a membrane".into()), now())
            .unwrap();
        assert!(matches!(ticket, AnswerTicket::NeedsGrading { index: 2, .. }));
        assert_eq!(AssessmentEngine::state(&rec), AssessmentState::InProgress(2));
        assert!(engine.finish(&mut rec).is_none());

        let outcome = futures::executor::block_on(engine.grade(&rec.assessment.as_ref().unwrap().questions[2], "x"));
        assert_eq!(outcome, GradingOutcome::Graded { correct: false, feedback: "graded".into() });
        engine.apply_grading(&mut rec, 2, outcome, now()).unwrap();
        assert_eq!(AssessmentEngine::state(&rec), AssessmentState::Completed);

        let result = engine.finish(&mut rec).unwrap();
        assert_eq!(result.total_correct, 2);
        assert!(result.passed);
        assert_eq!(result.mode, Mode::Protege);
        assert_eq!(rec.metadata.current_mode, Mode::Protege);
    }

    #[test]
    fn test_grader_failure_falls_back_to_heuristic() {
        let engine = engine(None);
        let question = three_questions().remove(2);
        let outcome = futures::executor::block_on(engine.grade(&question, "a long enough answer"));
        assert_eq!(outcome, GradingOutcome::Unavailable);

        let long = AnsweredQuestion { question_index: 2, raw_answer: RawAnswer::Text("a long enough answer".into()), is_correct: None, ai_feedback: None };
        let short = AnsweredQuestion { question_index: 2, raw_answer: RawAnswer::Text("water".into()), is_correct: None, ai_feedback: None };
        assert!(engine.evaluate(&question, &long));
        assert!(!engine.evaluate(&question, &short));
    }

    #[test]
    fn test_grader_timeout_falls_back() {
        let engine = AssessmentEngine::new(Rc::new(NeverGrader), Rc::new(ImmediateTimer), Duration::from_millis(1), 10);
        let question = three_questions().remove(2);
        let outcome = futures::executor::block_on(engine.grade(&question, "anything"));
        assert_eq!(outcome, GradingOutcome::Unavailable);
    }

    #[test]
    fn test_all_correct_with_clamped_threshold_is_protege() {
        let engine = engine(Some(true));
        let mut rec = record();
        engine.start(&mut rec, three_questions(), 10, now()).unwrap();
        engine.record_answer(&mut rec, 0, RawAnswer::Choice(0), now()).unwrap();
        engine.record_answer(&mut rec, 1, RawAnswer::Choice(1), now()).unwrap();
        engine.record_answer(&mut rec, 2, RawAnswer::Text("osmosis is water diffusion".into()), now()).unwrap();
        engine.apply_grading(&mut rec, 2, GradingOutcome::Graded { correct: true, feedback: "good".into() }, now()).unwrap();

        let outcome = engine.finish(&mut rec).unwrap();
        assert_eq!(outcome.total_correct, 3);
        assert_eq!(outcome.pass_threshold, 3);
        assert_eq!(outcome.mode, Mode::Protege);
    }

    #[test]
    fn test_failing_assessment_selects_tutor() {
        let engine = engine(Some(false));
        let mut rec = record();
        rec.metadata.current_mode = Mode::Protege;
        engine.start(&mut rec, three_questions(), 2, now()).unwrap();
        engine.record_answer(&mut rec, 0, RawAnswer::Choice(1), now()).unwrap();
        engine.record_answer(&mut rec, 1, RawAnswer::Choice(0), now()).unwrap();
        engine.record_answer(&mut rec, 2, RawAnswer::Text("no idea".into()), now()).unwrap();
        engine.apply_grading(&mut rec, 2, GradingOutcome::Unavailable, now()).unwrap();

        let outcome = engine.finish(&mut rec).unwrap();
        assert_eq!(outcome.total_correct, 0);
        assert!(!outcome.passed);
        assert_eq!(rec.metadata.current_mode, Mode::Tutor);
        assert!(rec.student_answers[2].as_ref().unwrap().is_correct.is_none());
    }

    #[test]
    fn test_true_false_boolean_answer() {
        let engine = engine(Some(true));
        let question = q(json!({"type": "true-false", "text": "x", "correctAnswer": true}));
        let answered = AnsweredQuestion { question_index: 0, raw_answer: RawAnswer::Choice(1), is_correct: None, ai_feedback: None };
        assert!(!engine.evaluate(&question, &answered));
    }

    #[test]
    fn test_question_prompt_lists_options() {
        let questions = three_questions();
        let text = question_prompt(1, 3, &questions[1]);
        assert_eq!(text, "Question 2 of 3: Fruit?\nA) Mango\nB) Apple");
    }
}
