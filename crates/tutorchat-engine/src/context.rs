//! Replays a persisted session into LLM history turns.

use std::fmt::Write as _;

use tutorchat_types::{ContextTurn, Role, SessionRecord, Sender};

use crate::assessment::AssessmentEngine;

/// Build the conversation history for the next chat turn.
///
/// Returns `None` when the record belongs to a different session than
/// `active_session_id`. The output depends only on the record.
pub fn build_context(
    record: &SessionRecord,
    active_session_id: &str,
    scorer: &AssessmentEngine,
) -> Option<Vec<ContextTurn>> {
    if record.session_id() != active_session_id {
        log::debug!(
            "Context requested for session {} but record is {}, skipping",
            active_session_id,
            record.session_id()
        );
        return None;
    }

    let mut turns = Vec::with_capacity(record.messages.len() + 3);
    let mode = record.metadata.current_mode;
    let assessment = record.assessment.as_ref();

    let mut opening = format!(
        "We're working on the unit \"{}\" in {} mode.",
        record.metadata.unit_name,
        mode.display_name()
    );
    match assessment {
        Some(a) => {
            let _ = write!(
                opening,
                " You took a calibration assessment of {} questions for this unit.",
                a.questions.len()
            );
        }
        None => opening.push_str(" No calibration assessment has been taken for this unit."),
    }
    turns.push(ContextTurn::assistant(opening));

    if let Some(assessment) = assessment.filter(|_| record.answered_count() > 0) {
        let mut recap = String::from("Here are my calibration answers:");
        for (question, answered) in assessment.questions.iter().zip(record.student_answers.iter()) {
            let Some(answered) = answered else { continue };
            let tag = if scorer.evaluate(question, answered) { "correct" } else { "incorrect" };
            let _ = write!(
                recap,
                "\nQ{}: {}\nMy answer: {}\nCorrect answer: {}\nResult: {}",
                answered.question_index + 1,
                question.text,
                question.answer_label(&answered.raw_answer),
                question.correct_answer_label(),
                tag
            );
        }
        turns.push(ContextTurn::user(recap));

        let total_correct = scorer.total_correct(record);
        let verdict = if total_correct >= assessment.pass_threshold as usize {
            "which meets the pass threshold"
        } else {
            "which is below the pass threshold"
        };
        turns.push(ContextTurn::assistant(format!(
            "You answered {} of {} correctly (threshold {}), {}.",
            total_correct,
            assessment.questions.len(),
            assessment.pass_threshold,
            verdict
        )));
    }

    turns.extend(record.messages.iter().filter(|m| m.is_regular_chat()).map(|m| ContextTurn {
        role: match m.sender {
            Sender::User => Role::User,
            Sender::Bot => Role::Assistant,
        },
        content: m.content.clone(),
    }));

    Some(turns)
}
