//! Calibration questions.
//!
//! Question banks arrive in several loose shapes: options as an array or as a
//! letter-keyed object, the correct answer as a key, an index, a boolean or
//! the option text itself. [`RawQuestion`] accepts all of them and the
//! conversion into [`Question`] resolves them once, so the rest of the system
//! only ever sees the canonical form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TRUE_FALSE_LABELS;

/// A single answer option of a multiple-choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub key: String,
    pub text: String,
}

/// Type-specific part of a question, with the correct answer already resolved
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionKind {
    TrueFalse {
        /// `None` when the bank's answer could not be read as a boolean
        answer: Option<bool>,
    },
    MultipleChoice {
        /// Options in the order the bank listed them
        options: Vec<ChoiceOption>,
        /// The answer exactly as the bank gave it
        correct_key: String,
        correct_index: Option<usize>,
    },
    ShortAnswer {
        expected: String,
    },
    /// A type this client does not know; graded by direct equality
    Other {
        type_name: String,
        expected: String,
    },
}

/// A student's answer: an option index for choice questions, text otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAnswer {
    Choice(usize),
    Text(String),
}

impl RawAnswer {
    pub fn as_text(&self) -> String {
        match self {
            RawAnswer::Choice(index) => index.to_string(),
            RawAnswer::Text(text) => text.clone(),
        }
    }
}

/// Canonical calibration question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawQuestion", into = "RawQuestion")]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub explanation: Option<String>,
    pub unit_name: String,
    pub pass_threshold: Option<u32>,
}

impl Question {
    pub fn type_name(&self) -> &str {
        match &self.kind {
            QuestionKind::TrueFalse { .. } => "true-false",
            QuestionKind::MultipleChoice { .. } => "multiple-choice",
            QuestionKind::ShortAnswer { .. } => "short-answer",
            QuestionKind::Other { type_name, .. } => type_name,
        }
    }

    /// Whether the student answers by picking an option index
    pub fn is_choice(&self) -> bool {
        matches!(
            self.kind,
            QuestionKind::TrueFalse { .. } | QuestionKind::MultipleChoice { .. }
        )
    }

    /// Option labels in index order; empty for free-text questions
    pub fn choice_labels(&self) -> Vec<String> {
        match &self.kind {
            QuestionKind::TrueFalse { .. } => TRUE_FALSE_LABELS.iter().map(|s| s.to_string()).collect(),
            QuestionKind::MultipleChoice { options, .. } => options.iter().map(|o| o.text.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Grade a picked option. Returns `None` for questions that are not
    /// answered by picking an option.
    pub fn evaluate_choice(&self, index: usize) -> Option<bool> {
        match &self.kind {
            QuestionKind::TrueFalse { answer } => {
                let picked = match index {
                    0 => true,
                    1 => false,
                    _ => return Some(false),
                };
                Some(*answer == Some(picked))
            }
            QuestionKind::MultipleChoice { correct_index, .. } => Some(*correct_index == Some(index)),
            _ => None,
        }
    }

    /// Direct equality between the answer and the expected value, trimmed and
    /// case-insensitive
    pub fn evaluate_direct(&self, answer: &RawAnswer) -> bool {
        let expected = match &self.kind {
            QuestionKind::ShortAnswer { expected } | QuestionKind::Other { expected, .. } => expected.clone(),
            QuestionKind::TrueFalse { answer } => answer.map(|b| b.to_string()).unwrap_or_default(),
            QuestionKind::MultipleChoice { correct_key, .. } => correct_key.clone(),
        };
        !expected.trim().is_empty() && answer.as_text().trim().eq_ignore_ascii_case(expected.trim())
    }

    /// Human-readable form of the correct answer
    pub fn correct_answer_label(&self) -> String {
        match &self.kind {
            QuestionKind::TrueFalse { answer: Some(true) } => TRUE_FALSE_LABELS[0].to_string(),
            QuestionKind::TrueFalse { answer: Some(false) } => TRUE_FALSE_LABELS[1].to_string(),
            QuestionKind::TrueFalse { answer: None } => "unknown".to_string(),
            QuestionKind::MultipleChoice { options, correct_key, correct_index } => match correct_index {
                Some(i) => format!("{}) {}", options[*i].key, options[*i].text),
                None => correct_key.clone(),
            },
            QuestionKind::ShortAnswer { expected } | QuestionKind::Other { expected, .. } => expected.clone(),
        }
    }

    /// Human-readable form of a student's answer to this question
    pub fn answer_label(&self, answer: &RawAnswer) -> String {
        match (&self.kind, answer) {
            (QuestionKind::TrueFalse { .. }, RawAnswer::Choice(i)) => TRUE_FALSE_LABELS
                .get(*i)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("option {}", i)),
            (QuestionKind::MultipleChoice { options, .. }, RawAnswer::Choice(i)) => options
                .get(*i)
                .map(|o| format!("{}) {}", o.key, o.text))
                .unwrap_or_else(|| format!("option {}", i)),
            (_, other) => other.as_text(),
        }
    }
}

// ============================================================================
// Ingestion shape
// ============================================================================

/// Loose wire shape of a question as found in question banks and old records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    #[serde(default)]
    pub id: Value,
    #[serde(rename = "type", alias = "questionType", alias = "question_type", default)]
    pub question_type: String,
    #[serde(alias = "question", alias = "questionText", default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
    #[serde(alias = "correct_answer", alias = "answer", default)]
    pub correct_answer: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(alias = "unit_name", alias = "unit", default)]
    pub unit_name: String,
    #[serde(alias = "pass_threshold", default, skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<u32>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn option_key(index: usize) -> String {
    if index < 26 {
        ((b'A' + index as u8) as char).to_string()
    } else {
        (index + 1).to_string()
    }
}

fn normalize_options(options: &Value) -> Vec<ChoiceOption> {
    match options {
        Value::Object(map) => map
            .iter()
            .map(|(key, text)| ChoiceOption { key: key.clone(), text: value_to_string(text) })
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(obj) => ChoiceOption {
                    key: obj.get("key").map(value_to_string).unwrap_or_else(|| option_key(i)),
                    text: obj.get("text").map(value_to_string).unwrap_or_default(),
                },
                other => ChoiceOption { key: option_key(i), text: value_to_string(other) },
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolve a bank answer (key, index, or option text) to a zero-based index
fn resolve_correct_index(options: &[ChoiceOption], correct: &Value) -> Option<usize> {
    match correct {
        Value::Number(n) => n.as_u64().map(|n| n as usize).filter(|i| *i < options.len()),
        Value::String(s) => {
            let wanted = s.trim();
            options
                .iter()
                .position(|o| o.key.trim().eq_ignore_ascii_case(wanted))
                .or_else(|| wanted.parse::<usize>().ok().filter(|i| *i < options.len()))
                .or_else(|| options.iter().position(|o| o.text.trim().eq_ignore_ascii_case(wanted)))
        }
        _ => None,
    }
}

fn normalize_type(question_type: &str) -> String {
    question_type.trim().to_lowercase().replace(['_', ' '], "-")
}

impl From<RawQuestion> for Question {
    fn from(raw: RawQuestion) -> Self {
        let type_name = normalize_type(&raw.question_type);
        let kind = match type_name.as_str() {
            "true-false" | "truefalse" | "boolean" => QuestionKind::TrueFalse {
                answer: parse_bool(&raw.correct_answer),
            },
            "multiple-choice" | "multiplechoice" | "mcq" | "choice" => {
                let options = normalize_options(&raw.options);
                let correct_index = resolve_correct_index(&options, &raw.correct_answer);
                QuestionKind::MultipleChoice {
                    options,
                    correct_key: value_to_string(&raw.correct_answer),
                    correct_index,
                }
            }
            "short-answer" | "shortanswer" | "free-text" | "open-ended" => QuestionKind::ShortAnswer {
                expected: value_to_string(&raw.correct_answer),
            },
            _ => QuestionKind::Other {
                type_name,
                expected: value_to_string(&raw.correct_answer),
            },
        };

        Question {
            id: value_to_string(&raw.id),
            text: raw.text,
            kind,
            explanation: raw.explanation,
            unit_name: raw.unit_name,
            pass_threshold: raw.pass_threshold,
        }
    }
}

impl From<Question> for RawQuestion {
    fn from(question: Question) -> Self {
        let question_type = question.type_name().to_string();
        let (options, correct_answer) = match question.kind {
            QuestionKind::TrueFalse { answer } => (Value::Null, answer.map(Value::Bool).unwrap_or(Value::Null)),
            QuestionKind::MultipleChoice { options, correct_key, .. } => {
                let map: Map<String, Value> = options
                    .into_iter()
                    .map(|o| (o.key, Value::String(o.text)))
                    .collect();
                (Value::Object(map), Value::String(correct_key))
            }
            QuestionKind::ShortAnswer { expected } | QuestionKind::Other { expected, .. } => {
                (Value::Null, Value::String(expected))
            }
        };

        RawQuestion {
            id: Value::String(question.id),
            question_type,
            text: question.text,
            options,
            correct_answer,
            explanation: question.explanation,
            unit_name: question.unit_name,
            pass_threshold: question.pass_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Question {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_multiple_choice_key_resolves_in_listed_order() {
        let q = parse(json!({
            "id": 7,
            "type": "multiple-choice",
            "text": "Which is a citrus?",
            "options": {"A": "Mango", "B": "Apple"},
            "correctAnswer": "B"
        }));
        assert_eq!(q.id, "7");
        assert_eq!(q.evaluate_choice(1), Some(true));
        assert_eq!(q.evaluate_choice(0), Some(false));
        assert_eq!(q.correct_answer_label(), "B) Apple");
    }

    #[test]
    fn test_object_options_keep_insertion_order_not_key_order() {
        let q = parse(json!({
            "type": "multiple_choice",
            "question": "Pick one",
            "options": {"C": "third", "A": "first", "B": "second"},
            "correct_answer": "A"
        }));
        assert_eq!(q.choice_labels(), vec!["third", "first", "second"]);
        assert_eq!(q.evaluate_choice(1), Some(true));
    }

    #[test]
    fn test_array_options_accept_index_and_text_answers() {
        let by_index = parse(json!({
            "type": "mcq",
            "text": "2 + 2",
            "options": ["3", "4", "5"],
            "correctAnswer": 1
        }));
        assert_eq!(by_index.evaluate_choice(1), Some(true));

        let by_text = parse(json!({
            "type": "multiple-choice",
            "text": "2 + 2",
            "options": ["3", "4", "5"],
            "correctAnswer": "4"
        }));
        // "4" is not a key, parses as index 4 (out of range), then matches the text
        assert_eq!(by_text.evaluate_choice(1), Some(true));
    }

    #[test]
    fn test_unresolvable_answer_never_matches() {
        let q = parse(json!({
            "type": "multiple-choice",
            "text": "?",
            "options": {"A": "x"},
            "correctAnswer": "Z"
        }));
        assert_eq!(q.evaluate_choice(0), Some(false));
        assert_eq!(q.correct_answer_label(), "Z");
    }

    #[test]
    fn test_true_false_normalization() {
        let string_answer = parse(json!({"type": "true-false", "text": "Sky is blue", "correctAnswer": "True"}));
        assert_eq!(string_answer.evaluate_choice(0), Some(true));

        let bool_answer = parse(json!({"type": "true_false", "text": "Fish fly", "correctAnswer": true}));
        assert_eq!(bool_answer.evaluate_choice(1), Some(false));

        let lower = parse(json!({"type": "true-false", "text": "x", "correctAnswer": "false"}));
        assert_eq!(lower.evaluate_choice(1), Some(true));
        assert_eq!(lower.evaluate_choice(5), Some(false));
    }

    #[test]
    fn test_short_answer_is_not_a_choice() {
        let q = parse(json!({"type": "short-answer", "text": "Define osmosis", "correctAnswer": "diffusion of water"}));
        assert!(!q.is_choice());
        assert_eq!(q.evaluate_choice(0), None);
    }

    #[test]
    fn test_unknown_type_uses_direct_equality() {
        let q = parse(json!({"type": "numeric", "text": "6 x 7", "correctAnswer": 42}));
        assert_eq!(q.type_name(), "numeric");
        assert!(q.evaluate_direct(&RawAnswer::Text(" 42 ".into())));
        assert!(!q.evaluate_direct(&RawAnswer::Text("41".into())));
    }

    #[test]
    fn test_canonical_form_reloads_identically() {
        let q = parse(json!({
            "id": "q1",
            "type": "multiple-choice",
            "text": "Pick",
            "options": ["a", "b"],
            "correctAnswer": "b",
            "unitName": "Unit 1",
            "passThreshold": 2
        }));
        let stored = serde_json::to_value(&q).unwrap();
        assert_eq!(stored["options"], json!({"A": "a", "B": "b"}));
        let reloaded: Question = serde_json::from_value(stored).unwrap();
        assert_eq!(reloaded, q);
    }
}
