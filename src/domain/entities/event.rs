use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Host-domain event types delivered through the manager fan-out
pub const MESSAGE_CREATE: &str = "message_create";
pub const MESSAGE_UPDATE: &str = "message_update";
pub const MESSAGE_DELETE: &str = "message_delete";
pub const MEMBER_JOIN: &str = "member_join";
pub const MEMBER_LEAVE: &str = "member_leave";
pub const CHANNEL_CREATE: &str = "channel_create";
pub const PRESENCE_UPDATE: &str = "presence_update";

// Runtime lifecycle notifications published on the event bus
pub const PLUGIN_LOADED: &str = "plugin.loaded";
pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
pub const PLUGIN_ERRORED: &str = "plugin.errored";
pub const PLUGIN_HEALTH_CHANGED: &str = "plugin.health_changed";

/// Subscription key matching every event type
pub const WILDCARD: &str = "*";

/// A typed tag plus an untyped payload bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Build an event from a JSON object payload; non-objects land under `value`
    pub fn from_payload(event_type: impl Into<String>, payload: Value) -> Self {
        let mut event = Self::new(event_type);
        match payload {
            Value::Object(map) => event.data = map,
            Value::Null => {}
            other => {
                event.data.insert("value".to_string(), other);
            }
        }
        event
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_objects_become_data() {
        let event = Event::from_payload(MEMBER_JOIN, json!({"user_id": "7"}));
        assert_eq!(event.get_str("user_id"), Some("7"));

        let scalar = Event::from_payload("custom", json!(5));
        assert_eq!(scalar.data.get("value"), Some(&json!(5)));
    }
}
