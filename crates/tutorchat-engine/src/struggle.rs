use std::cell::RefCell;
use std::rc::Rc;

use tutorchat_types::{SessionRecord, StruggleState};

use crate::error::StruggleError;
use crate::services::StruggleTopicService;

/// Tracks the single most recent active struggle topic ("directive mode").
///
/// At most one topic is active at a time, so the host shows at most one
/// banner. A reset clears the topic only after the backend accepted it. The
/// owner mirrors the active topic into `metadata.activeStruggleTopic` so it
/// survives a reload.
pub struct StruggleGate {
    active: RefCell<Option<String>>,
    service: Rc<dyn StruggleTopicService>,
}

impl StruggleGate {
    pub fn new(service: Rc<dyn StruggleTopicService>) -> Self {
        Self {
            active: RefCell::new(None),
            service,
        }
    }

    pub fn active_topic(&self) -> Option<String> {
        self.active.borrow().clone()
    }

    /// Pick up the topic persisted in a restored record
    pub fn restore(&self, record: &SessionRecord) {
        let topic = record.metadata.active_struggle_topic.clone();
        if let Some(topic) = &topic {
            log::debug!("Restored struggle topic '{}'", topic);
        }
        *self.active.borrow_mut() = topic;
    }

    /// Fold in the struggle state attached to a bot turn and return the topic
    /// now active. The last active topic in the list wins; if the tracked
    /// topic is reported inactive it is dropped.
    pub fn observe(&self, state: &StruggleState) -> Option<String> {
        let mut active = self.active.borrow_mut();
        if let Some(topic) = state.topics.iter().rev().find(|t| t.is_active) {
            if active.as_deref() != Some(topic.topic.as_str()) {
                log::info!("Struggle topic now active: '{}' (seen {} times)", topic.topic, topic.count);
            }
            *active = Some(topic.topic.clone());
        } else if let Some(current) = active.as_deref() {
            let cleared = state.topics.iter().any(|t| t.topic == current && !t.is_active);
            if cleared {
                log::info!("Struggle topic '{}' no longer active", current);
                *active = None;
            }
        }
        active.clone()
    }

    /// Ask the backend to reset the active topic, clearing it locally on success
    pub async fn reset(&self, course_id: &str) -> Result<String, StruggleError> {
        let topic = self.active_topic().ok_or(StruggleError::NoActiveTopic)?;
        match self.service.reset(&topic, course_id).await {
            Ok(ack) if ack.success => {
                log::info!("Struggle topic '{}' reset", topic);
                *self.active.borrow_mut() = None;
                Ok(topic)
            }
            Ok(ack) => Err(StruggleError::Rejected { topic, message: ack.message }),
            Err(source) => Err(StruggleError::Service { topic, source }),
        }
    }
}
