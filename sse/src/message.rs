use serde::Deserialize;
use serde_json::Value;

/// Event name announcing that a notification was created for this user.
pub const NEW_NOTIFICATION: &str = "new_notification";
/// Event name telling the client its session was revoked server side.
pub const FORCE_LOGOUT: &str = "force_logout";
/// Default SSE event name when the server sets none.
const DEFAULT_EVENT_TYPE: &str = "message";

/// Trait for getting the SSE event type name
pub trait EventType {
    fn event_type(&self) -> &str;
}

/// A decoded frame from the push transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A notification was created. The payload is opaque; at minimum it is a
    /// trigger to refetch.
    NewNotification { payload: Value },
    /// The server ended this user's session.
    ForceLogout { reason: String },
    /// Comment or heartbeat frame. Proves the connection is alive.
    KeepAlive,
    /// Any event this client does not act on.
    Other { event_type: String },
}

impl EventType for PushEvent {
    fn event_type(&self) -> &str {
        match self {
            PushEvent::NewNotification { .. } => NEW_NOTIFICATION,
            PushEvent::ForceLogout { .. } => FORCE_LOGOUT,
            PushEvent::KeepAlive => "keep_alive",
            PushEvent::Other { event_type } => event_type,
        }
    }
}

/// `{ "type": ..., "data": ... }` envelope the backend may wrap events in.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ForceLogoutData {
    #[serde(default)]
    reason: String,
}

impl PushEvent {
    /// Decode a raw SSE frame.
    ///
    /// The event name comes from the SSE `event:` field; when that is the
    /// default `message`, a `type` field inside a JSON envelope is used
    /// instead. Data that is not JSON is carried as a JSON string.
    pub fn decode(event_type: &str, data: &str) -> PushEvent {
        let parsed = parse_data(data);

        let (event_type, body) = match serde_json::from_value::<Envelope>(parsed.clone()) {
            Ok(envelope)
                if event_type == DEFAULT_EVENT_TYPE || envelope.event_type == event_type =>
            {
                (envelope.event_type, envelope.data)
            }
            _ => (event_type.to_string(), parsed),
        };

        match event_type.as_str() {
            NEW_NOTIFICATION => PushEvent::NewNotification { payload: body },
            FORCE_LOGOUT => {
                let reason = serde_json::from_value::<ForceLogoutData>(body)
                    .map(|data| data.reason)
                    .unwrap_or_default();
                PushEvent::ForceLogout { reason }
            }
            _ => PushEvent::Other { event_type },
        }
    }
}

fn parse_data(data: &str) -> Value {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}
