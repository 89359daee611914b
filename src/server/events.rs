use axum::response::sse::Event;
use serde::Serialize;

use crate::traversal::TraversalEvent;

/// Producer id attached to streamed diagnostics and text.
pub const PRODUCER: &str = "considerations";

/// One server-sent event of `/resolve/stream`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An engine step finished.
    ToolCallEnd {
        producer: &'static str,
        diagnostic: TraversalEvent,
    },
    /// A picked consideration with its treatments.
    Suggestion {
        consideration: String,
        treatments: Vec<String>,
    },
    /// Rendered report text.
    Text { producer: &'static str, text: String },
    Error { status: u16, message: String },
    Done,
}

impl StreamEvent {
    pub fn diagnostic(diagnostic: TraversalEvent) -> Self {
        StreamEvent::ToolCallEnd {
            producer: PRODUCER,
            diagnostic,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::Text {
            producer: PRODUCER,
            text: text.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ToolCallEnd { .. } => "tool_call_end",
            StreamEvent::Suggestion { .. } => "suggestion",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    pub fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_default();
        Event::default().event(self.name()).data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_wire_shape() {
        let event = StreamEvent::diagnostic(TraversalEvent::Selected {
            candidates: 3,
            picked: vec!["Nocturia".to_string()],
        });
        assert_eq!(event.name(), "tool_call_end");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool_call_end",
                "producer": "considerations",
                "diagnostic": {"step": "selected", "candidates": 3, "picked": ["Nocturia"]}
            })
        );

        let text = StreamEvent::text("1. Nocturia");
        assert_eq!(
            serde_json::to_value(&text).unwrap(),
            json!({"type": "text", "producer": "considerations", "text": "1. Nocturia"})
        );
        assert_eq!(serde_json::to_value(StreamEvent::Done).unwrap(), json!({"type": "done"}));
    }
}
