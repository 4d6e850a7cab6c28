//! Outbound events and their wire framing.

use lagvakt_core::Citation;
use serde::{Deserialize, Serialize};

/// An event delivered to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of answer text
    Token { text: String },

    /// Citations in tier order
    Sources { sources: Vec<Citation> },

    /// Normal end of the answer
    Done,

    /// Terminal failure with a client-safe message
    Error { message: String },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        StreamEvent::Token { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// `Done` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

// Used if an event ever fails to serialize.
const FALLBACK_ERROR_FRAME: &str = "data: {\"type\":\"error\",\"message\":\"stream failure\"}\n\n";

/// One unit of relay output.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event(StreamEvent),

    /// Liveness marker. Carries no data and does not signal completion.
    KeepAlive,
}

impl RelayFrame {
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, RelayFrame::KeepAlive)
    }

    /// The event, if this frame carries one.
    pub fn event(&self) -> Option<&StreamEvent> {
        match self {
            RelayFrame::Event(event) => Some(event),
            RelayFrame::KeepAlive => None,
        }
    }

    /// Server-sent-events framing.
    ///
    /// Events become a single `data:` line; the keep-alive is a comment line,
    /// which compliant clients discard. Every frame ends with a blank line so
    /// a marker can never land inside a data frame.
    pub fn to_sse(&self) -> String {
        match self {
            RelayFrame::KeepAlive => ":ping\n\n".to_string(),
            RelayFrame::Event(event) => match serde_json::to_string(event) {
                Ok(json) => format!("data: {}\n\n", json),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize stream event");
                    FALLBACK_ERROR_FRAME.to_string()
                }
            },
        }
    }
}

impl From<StreamEvent> for RelayFrame {
    fn from(event: StreamEvent) -> Self {
        RelayFrame::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(StreamEvent::token("Ja")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "token", "text": "Ja"}));

        let json = serde_json::to_value(StreamEvent::Done).unwrap();
        assert_eq!(json, serde_json::json!({"type": "done"}));

        let json = serde_json::to_value(StreamEvent::Sources { sources: vec![] }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "sources", "sources": []}));
    }

    #[test]
    fn test_sse_framing() {
        assert_eq!(RelayFrame::KeepAlive.to_sse(), ":ping\n\n");

        let frame = RelayFrame::from(StreamEvent::error("tillfälligt fel"));
        assert_eq!(
            frame.to_sse(),
            "data: {\"type\":\"error\",\"message\":\"tillfälligt fel\"}\n\n"
        );
    }

    #[test]
    fn test_newlines_stay_inside_one_data_line() {
        let sse = RelayFrame::from(StreamEvent::token("rad ett\nrad två")).to_sse();
        assert_eq!(sse.matches('\n').count(), 2);
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::error("x").is_terminal());
        assert!(!StreamEvent::token("x").is_terminal());
        assert!(RelayFrame::KeepAlive.event().is_none());
    }
}
