//! Event envelope - the record published for each event.

use chrono::{DateTime, Utc};
use iset_id::{EventId, PassId};
use serde::{Deserialize, Serialize};

use crate::{EventError, EventReason, EventType, ObjectRef};

/// A single event about an instance set or one of its instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier.
    pub event_id: EventId,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The object this event is about.
    pub involved: ObjectRef,

    pub event_type: EventType,

    pub reason: EventReason,

    /// Human-readable message.
    pub message: String,

    /// The reconcile pass that recorded the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_id: Option<PassId>,
}

impl Event {
    /// Creates a new event builder.
    pub fn builder() -> EventBuilder {
        EventBuilder::new()
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.event_type == EventType::Warning
    }
}

/// Builder for constructing events.
#[derive(Debug, Default)]
pub struct EventBuilder {
    event_id: Option<EventId>,
    occurred_at: Option<DateTime<Utc>>,
    involved: Option<ObjectRef>,
    event_type: EventType,
    reason: Option<EventReason>,
    message: Option<String>,
    pass_id: Option<PassId>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    pub fn involved(mut self, object: ObjectRef) -> Self {
        self.involved = Some(object);
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn reason(mut self, reason: EventReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn pass_id(mut self, id: PassId) -> Self {
        self.pass_id = Some(id);
        self
    }

    /// Builds the event.
    ///
    /// The ID and timestamp default to fresh values; the involved object,
    /// reason and message are required.
    pub fn build(self) -> Result<Event, EventError> {
        Ok(Event {
            event_id: self.event_id.unwrap_or_default(),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            involved: self.involved.ok_or(EventError::MissingField("involved"))?,
            event_type: self.event_type,
            reason: self.reason.ok_or(EventError::MissingField("reason"))?,
            message: self.message.ok_or(EventError::MissingField("message"))?,
            pass_id: self.pass_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::builder()
            .involved(ObjectRef::new("InstanceSet", "default", "mysql"))
            .event_type(EventType::Warning)
            .reason(EventReason::OrdinalsNotEnough)
            .message("template t1 is short of 1 ordinal")
            .build()
            .unwrap();

        assert!(event.is_warning());
        assert_eq!(event.reason, EventReason::OrdinalsNotEnough);
        assert!(event.pass_id.is_none());
    }

    #[test]
    fn test_event_builder_missing_reason() {
        let result = Event::builder()
            .involved(ObjectRef::new("InstanceSet", "default", "mysql"))
            .message("no reason")
            .build();

        assert_eq!(result.unwrap_err(), EventError::MissingField("reason"));
    }

    #[test]
    fn test_event_serialization_is_camel_case() {
        let event = Event::builder()
            .involved(ObjectRef::new("Instance", "default", "mysql-0"))
            .reason(EventReason::MemberJoined)
            .message("joined")
            .build()
            .unwrap();

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("occurredAt").is_some());
        assert_eq!(json["eventType"], "Normal");
        assert!(json.get("passId").is_none());
    }
}
