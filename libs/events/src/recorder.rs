//! In-memory event buffer for a single reconcile pass.

use chrono::{DateTime, Utc};
use iset_id::PassId;
use tracing::{info, warn};

use crate::{Event, EventReason, EventType, ObjectRef};

/// Collects events during a pass; the caller publishes them at commit.
#[derive(Debug, Default)]
pub struct EventRecorder {
    pass_id: Option<PassId>,
    events: Vec<Event>,
}

impl EventRecorder {
    pub fn new(pass_id: PassId) -> Self {
        Self {
            pass_id: Some(pass_id),
            events: Vec::new(),
        }
    }

    /// Records a normal event.
    pub fn normal(
        &mut self,
        involved: ObjectRef,
        reason: EventReason,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.record(involved, EventType::Normal, reason, message.into(), at);
    }

    /// Records a warning event.
    pub fn warning(
        &mut self,
        involved: ObjectRef,
        reason: EventReason,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.record(involved, EventType::Warning, reason, message.into(), at);
    }

    fn record(
        &mut self,
        involved: ObjectRef,
        event_type: EventType,
        reason: EventReason,
        message: String,
        at: DateTime<Utc>,
    ) {
        match event_type {
            EventType::Normal => info!(object = %involved, reason = %reason, %message, "Event recorded"),
            EventType::Warning => warn!(object = %involved, reason = %reason, %message, "Event recorded"),
        }

        self.events.push(Event {
            event_id: Default::default(),
            occurred_at: at,
            involved,
            event_type,
            reason,
            message,
            pass_id: self.pass_id,
        });
    }

    /// Events recorded so far, oldest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns true if a recorded event carries the given reason.
    pub fn has_reason(&self, reason: EventReason) -> bool {
        self.events.iter().any(|e| e.reason == reason)
    }

    /// Takes all buffered events, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_ref() -> ObjectRef {
        ObjectRef::new("InstanceSet", "default", "mysql")
    }

    #[test]
    fn test_records_in_order_with_pass_id() {
        let pass = PassId::new();
        let mut recorder = EventRecorder::new(pass);
        let now = Utc::now();

        recorder.warning(set_ref(), EventReason::InvalidSpec, "bad", now);
        recorder.normal(set_ref(), EventReason::MemberJoined, "ok", now);

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_warning());
        assert_eq!(events[1].event_type, EventType::Normal);
        assert!(events.iter().all(|e| e.pass_id == Some(pass)));
        assert!(recorder.has_reason(EventReason::MemberJoined));
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut recorder = EventRecorder::default();
        recorder.normal(set_ref(), EventReason::MemberLeft, "left", Utc::now());

        assert_eq!(recorder.drain().len(), 1);
        assert!(recorder.events().is_empty());
    }
}
