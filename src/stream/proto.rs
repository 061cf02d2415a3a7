use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag of the frame the server sends once the stream is open.
pub const STREAM_OPEN_TAG: &str = "stream-open";
/// Tag of frames carrying a [`LiveEvent`] payload.
pub const MESSAGE_TAG: &str = "message";
/// Tag used when handing stream faults to the error handler.
pub const ERROR_TAG: &str = "error";

/// Stream-level events, as opposed to live event types carried in payloads.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ControlEvent {
    StreamOpen,
    Message,
    Error,
}

impl ControlEvent {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            STREAM_OPEN_TAG => Some(Self::StreamOpen),
            MESSAGE_TAG => Some(Self::Message),
            ERROR_TAG => Some(Self::Error),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::StreamOpen => STREAM_OPEN_TAG,
            Self::Message => MESSAGE_TAG,
            Self::Error => ERROR_TAG,
        }
    }
}

/// One decoded unit of the live message stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub event: String,
    pub data: String,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Application-level live message (TLM) carried by a `message` frame.
///
/// Keys missing from the payload fall back to their defaults; only malformed
/// JSON is rejected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    #[serde(default)]
    pub event_id: u64,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub read: Value,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Value,
}

impl LiveEvent {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame handed to handlers: the raw tag and data plus the parsed payload
/// for `message` frames.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveMessage {
    pub event: String,
    pub data: String,
    pub parsed: Option<LiveEvent>,
}

impl LiveMessage {
    pub(crate) fn error(message: String) -> Self {
        Self {
            event: ERROR_TAG.to_string(),
            data: message,
            parsed: None,
        }
    }
}

impl From<RawFrame> for LiveMessage {
    fn from(frame: RawFrame) -> Self {
        Self {
            event: frame.event,
            data: frame.data,
            parsed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{ControlEvent, LiveEvent, ERROR_TAG, MESSAGE_TAG, STREAM_OPEN_TAG};

    #[test]
    fn control_tags_map_both_ways() {
        for control in [
            ControlEvent::StreamOpen,
            ControlEvent::Message,
            ControlEvent::Error,
        ] {
            assert_eq!(ControlEvent::from_tag(control.tag()), Some(control));
        }
        assert_eq!(STREAM_OPEN_TAG, "stream-open");
        assert_eq!(MESSAGE_TAG, "message");
        assert_eq!(ERROR_TAG, "error");
        assert_eq!(ControlEvent::from_tag("content.modified.html-document"), None);
    }

    #[test]
    fn live_event_parses_full_payload() {
        let text = r#"{
            "event_id": 812,
            "event_type": "content.created.comment",
            "read": null,
            "created": "2021-03-04T10:11:12Z",
            "fields": {"workspace": {"workspace_id": 3}}
        }"#;
        let event = LiveEvent::from_text(text).expect("parse live event");

        assert_eq!(event.event_id, 812);
        assert_eq!(event.event_type, "content.created.comment");
        assert_eq!(
            event.created,
            Some(Utc.with_ymd_and_hms(2021, 3, 4, 10, 11, 12).unwrap())
        );
        assert_eq!(event.fields, json!({"workspace": {"workspace_id": 3}}));
    }

    #[test]
    fn live_event_defaults_missing_keys() {
        let event = LiveEvent::from_text(r#"{"event_id":5,"event_type":"x"}"#)
            .expect("parse partial live event");

        assert_eq!(event.event_id, 5);
        assert_eq!(event.event_type, "x");
        assert_eq!(event.created, None);
        assert!(event.fields.is_null());
    }

    #[test]
    fn live_event_rejects_malformed_json() {
        assert!(LiveEvent::from_text(r#"{"event_id":5,"#).is_err());
        assert!(LiveEvent::from_text("").is_err());
    }
}
