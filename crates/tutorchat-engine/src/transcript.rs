//! The append-only chat log and the one-shot gates driven by its size.

use chrono::{DateTime, Duration, Utc};

use tutorchat_types::{Message, MessageType, Mode, SessionRecord, Sender};

pub const VOLUME_WARNING_TEXT: &str = "You've sent quite a few messages in this session. \
Long conversations can drift off topic; consider starting a new session from the menu \
if you want to switch focus or take a break.";

pub const REFLECTION_PROMPT_TEXT: &str = "Before we go on, take a moment to reflect: \
what is one idea from this conversation you could now explain in your own words?";

/// Mutating view over a record's transcript.
///
/// Every append keeps `metadata.total_messages` and `last_activity_timestamp`
/// in step with the log. Persisting the result is the caller's job.
pub struct ChatTranscript<'a> {
    record: &'a mut SessionRecord,
}

impl<'a> ChatTranscript<'a> {
    pub fn new(record: &'a mut SessionRecord) -> Self {
        Self { record }
    }

    /// Append a message, nudging its timestamp forward if needed so the log
    /// stays strictly ordered
    pub fn append(&mut self, mut message: Message, now: DateTime<Utc>) -> &Message {
        if let Some(last) = self.record.messages.last() {
            if message.timestamp <= last.timestamp {
                message.timestamp = last.timestamp + Duration::milliseconds(1);
            }
        }
        self.record.messages.push(message);
        self.record.metadata.total_messages = self.record.messages.len();
        self.record.last_activity_timestamp = now;
        &self.record.messages[self.record.messages.len() - 1]
    }

    pub fn first_user_index(&self) -> Option<usize> {
        self.record.messages.iter().position(|m| m.sender == Sender::User)
    }

    pub fn count_regular_chat_since(&self, index: usize) -> usize {
        self.record
            .messages
            .iter()
            .skip(index)
            .filter(|m| m.is_regular_chat())
            .count()
    }

    /// Regular-chat messages from the student's first message onward
    pub fn regular_chat_count(&self) -> usize {
        self.first_user_index()
            .map(|i| self.count_regular_chat_since(i))
            .unwrap_or(0)
    }

    /// Inject the message-volume warning if `count` hits one of the trigger
    /// counts and it has not been shown this session. Returns whether it was
    /// injected.
    pub fn inject_volume_warning(&mut self, count: usize, trigger_counts: &[usize], now: DateTime<Utc>) -> bool {
        if self.record.metadata.warning_shown || !trigger_counts.contains(&count) {
            return false;
        }
        self.record.metadata.warning_shown = true;
        self.append(Message::bot(VOLUME_WARNING_TEXT, MessageType::SystemNotice, now), now);
        log::info!("Message-volume warning shown at {} messages", count);
        true
    }

    /// Claim the reflection prompt for the next bot reply. Fires at most once
    /// per session and only in tutor mode.
    pub fn take_reflection_prompt(&mut self, count: usize, trigger_counts: &[usize], mode: Mode) -> Option<&'static str> {
        if mode != Mode::Tutor
            || self.record.metadata.reflection_prompt_shown
            || !trigger_counts.contains(&count)
        {
            return None;
        }
        self.record.metadata.reflection_prompt_shown = true;
        log::info!("Reflection prompt attached at {} messages", count);
        Some(REFLECTION_PROMPT_TEXT)
    }
}
