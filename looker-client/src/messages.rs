//! Events sent from the engine to the viewing surface.

use serde::{Deserialize, Serialize};

/// Events dispatched through
/// [`FrameStreamListener::dispatch_event`](crate::FrameStreamListener::dispatch_event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StreamEvent {
    /// The buffering indicator changed.
    ///
    /// Only `Buffering(false)` is emitted by the coordinator, once per
    /// transition out of buffering.
    Buffering(bool),

    /// The stream failed.
    ///
    /// The stream stays stalled until the next frame request restarts it.
    Error {
        /// The error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<StreamEvent>();
    }

    #[test]
    fn test_error_event_serializes_with_tag() {
        let event = StreamEvent::Error {
            message: "backend unavailable".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["message"], "backend unavailable");

        let json = serde_json::to_value(StreamEvent::Buffering(false)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "buffering", "data": false }));
    }
}
