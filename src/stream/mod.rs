//! Wire protocol for incremental generation responses.
//!
//! The backend writes one frame per line:
//!
//! ```text
//! data: {"content":"Hel"}
//! data: {"content":"lo"}
//! data: {"done":true,"service_used":"svc"}
//! ```
//!
//! Lines without the `data:` prefix are ignored so the server can send
//! comments and keep-alives. See [`parser::FrameParser`] for the decoder.

pub mod parser;

pub use parser::{FRAME_PREFIX, FrameParser, decode_stream};

use serde::Deserialize;

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamEvent {
    /// A fragment of assistant text, in arrival order.
    Content(String),
    /// The turn finished; carries the backend service that answered.
    Done(Option<String>),
    /// The backend reported a failure mid-stream.
    Error(String),
}

impl StreamEvent {
    /// Whether parsing stops after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done(_) | StreamEvent::Error(_))
    }
}

/// Raw JSON payload of a frame. Every field is optional so that one struct
/// covers all three shapes; [`FramePayload::into_event`] decides which one
/// it is.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FramePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    service_used: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl FramePayload {
    /// `error` wins over `done`, which wins over `content`. Returns `None`
    /// for payloads that match no known shape.
    pub(crate) fn into_event(self) -> Option<StreamEvent> {
        if let Some(message) = self.error {
            return Some(StreamEvent::Error(message));
        }
        if self.done == Some(true) {
            return Some(StreamEvent::Done(self.service_used));
        }
        self.content.map(StreamEvent::Content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> Option<StreamEvent> {
        serde_json::from_str::<FramePayload>(json)
            .unwrap()
            .into_event()
    }

    #[test]
    fn test_content_payload() {
        assert_eq!(
            payload(r#"{"content":"Hello"}"#),
            Some(StreamEvent::Content("Hello".to_string()))
        );
    }

    #[test]
    fn test_done_payload_with_and_without_service() {
        assert_eq!(
            payload(r#"{"done":true,"service_used":"svc"}"#),
            Some(StreamEvent::Done(Some("svc".to_string())))
        );
        assert_eq!(payload(r#"{"done":true}"#), Some(StreamEvent::Done(None)));
    }

    #[test]
    fn test_done_false_is_not_terminal() {
        assert_eq!(payload(r#"{"done":false}"#), None);
        assert_eq!(
            payload(r#"{"done":false,"content":"x"}"#),
            Some(StreamEvent::Content("x".to_string()))
        );
    }

    #[test]
    fn test_error_takes_precedence() {
        let event = payload(r#"{"error":"quota exceeded","content":"ignored"}"#).unwrap();
        assert_eq!(event, StreamEvent::Error("quota exceeded".to_string()));
        assert!(event.is_terminal());
    }

    #[test]
    fn test_unknown_shape_is_ignored() {
        assert_eq!(payload(r#"{"heartbeat":1}"#), None);
    }
}
