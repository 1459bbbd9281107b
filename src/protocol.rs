use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DomBridgeError, Result};

pub const EVENT_CONNECTED: &str = "connected";

/// Stable identity of one logical agent process, independent of its current
/// transport connection. An agent reconnecting after a drop reports the same
/// `instance_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDescriptor {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "extensionId")]
    pub extension_id: String,
    #[serde(rename = "profileName", default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl ProfileDescriptor {
    pub fn new(instance_id: impl Into<String>, extension_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            extension_id: extension_id.into(),
            profile_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }
}

/// The four wire envelope kinds, externally tagged on `type`. Timestamps are
/// epoch milliseconds and advisory only; they never drive ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Command {
        id: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<i64>,
        #[serde(rename = "profileId", default, skip_serializing_if = "Option::is_none")]
        profile_id: Option<String>,
        timestamp: i64,
    },
    Response {
        id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: i64,
    },
    Event {
        id: String,
        event: String,
        data: Value,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<ProfileDescriptor>,
        timestamp: i64,
    },
    Error {
        id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        timestamp: i64,
    },
}

impl Envelope {
    /// Commands carry an id minted by the caller so the response can be
    /// correlated against the pending-request table.
    pub fn command(
        id: impl Into<String>,
        action: impl Into<String>,
        payload: Option<Value>,
        tab_id: Option<i64>,
        profile_id: Option<String>,
    ) -> Self {
        Envelope::Command {
            id: id.into(),
            action: action.into(),
            payload,
            tab_id,
            profile_id,
            timestamp: now_millis(),
        }
    }

    pub fn response(
        request_id: impl Into<String>,
        success: bool,
        data: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Envelope::Response {
            id: mint_id(),
            request_id: request_id.into(),
            success,
            data,
            error,
            timestamp: now_millis(),
        }
    }

    pub fn event(
        event: impl Into<String>,
        data: Value,
        tab_id: Option<i64>,
        profile: Option<ProfileDescriptor>,
    ) -> Self {
        Envelope::Event {
            id: mint_id(),
            event: event.into(),
            data,
            tab_id,
            profile,
            timestamp: now_millis(),
        }
    }

    pub fn error(error: impl Into<String>, details: Option<Value>) -> Self {
        Envelope::Error {
            id: mint_id(),
            error: error.into(),
            details,
            timestamp: now_millis(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Envelope::Command { id, .. }
            | Envelope::Response { id, .. }
            | Envelope::Event { id, .. }
            | Envelope::Error { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Command { .. } => "command",
            Envelope::Response { .. } => "response",
            Envelope::Event { .. } => "event",
            Envelope::Error { .. } => "error",
        }
    }
}

pub fn mint_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn decode(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| DomBridgeError::Protocol(e.to_string()))
}

pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| DomBridgeError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_command_with_wire_field_names() {
        let text = json!({
            "id": "c1",
            "type": "command",
            "action": "listTabs",
            "tabId": 7,
            "profileId": "p1",
            "timestamp": 1000
        })
        .to_string();

        match decode(&text).unwrap() {
            Envelope::Command {
                id,
                action,
                tab_id,
                profile_id,
                payload,
                ..
            } => {
                assert_eq!(id, "c1");
                assert_eq!(action, "listTabs");
                assert_eq!(tab_id, Some(7));
                assert_eq!(profile_id.as_deref(), Some("p1"));
                assert!(payload.is_none());
            }
            other => panic!("decoded wrong kind: {}", other.kind()),
        }
    }

    #[test]
    fn decodes_response_and_event() {
        let response = json!({
            "id": "r1",
            "type": "response",
            "requestId": "c1",
            "success": true,
            "data": {"tabs": []},
            "timestamp": 1000
        })
        .to_string();
        match decode(&response).unwrap() {
            Envelope::Response {
                request_id, success, ..
            } => {
                assert_eq!(request_id, "c1");
                assert!(success);
            }
            other => panic!("decoded wrong kind: {}", other.kind()),
        }

        let event = json!({
            "id": "e1",
            "type": "event",
            "event": "connected",
            "data": {"connected": true},
            "profile": {"instanceId": "i1", "extensionId": "x1"},
            "timestamp": 1000
        })
        .to_string();
        match decode(&event).unwrap() {
            Envelope::Event { event, profile, .. } => {
                assert_eq!(event, EVENT_CONNECTED);
                assert_eq!(profile.unwrap().instance_id, "i1");
            }
            other => panic!("decoded wrong kind: {}", other.kind()),
        }
    }

    #[test]
    fn rejects_unknown_type_and_missing_fields() {
        let unknown = json!({"id": "x", "type": "ping", "timestamp": 1}).to_string();
        assert!(matches!(
            decode(&unknown),
            Err(DomBridgeError::Protocol(_))
        ));

        let missing_action = json!({"id": "x", "type": "command", "timestamp": 1}).to_string();
        assert!(matches!(
            decode(&missing_action),
            Err(DomBridgeError::Protocol(_))
        ));

        let missing_data =
            json!({"id": "x", "type": "event", "event": "pageLoad", "timestamp": 1}).to_string();
        assert!(matches!(
            decode(&missing_data),
            Err(DomBridgeError::Protocol(_))
        ));

        assert!(matches!(
            decode("not json"),
            Err(DomBridgeError::Protocol(_))
        ));
    }

    #[test]
    fn encodes_camel_case_wire_fields() {
        let envelope = Envelope::response("c1", false, None, Some("nope".to_string()));
        let text = encode(&envelope).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value.get("type").and_then(Value::as_str), Some("response"));
        assert_eq!(value.get("requestId").and_then(Value::as_str), Some("c1"));
        assert_eq!(value.get("error").and_then(Value::as_str), Some("nope"));
        assert!(value.get("data").is_none());
        assert!(value.get("timestamp").and_then(Value::as_i64).is_some());
    }

    #[test]
    fn minted_ids_are_unique() {
        let a = mint_id();
        let b = mint_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
