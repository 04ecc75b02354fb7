use serde_json::{Value, json};

use routecodex_protocol::{ResponsesEvent, event_payload};

/// Shared emission core for the Responses SSE drivers. Both the replay
/// simulator and the live transformer go through this sink so their event
/// shapes and numbering stay identical.
#[derive(Debug, Default)]
pub(crate) struct EventSink {
    last_sequence: u64,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence numbers are strictly increasing and start at 1.
    pub fn emit(&mut self, event: ResponsesEvent, fields: Value) -> Value {
        self.last_sequence += 1;
        event_payload(event, self.last_sequence, fields)
    }

    pub fn response_event(&mut self, event: ResponsesEvent, response: Value) -> Value {
        self.emit(event, json!({"response": response}))
    }

    pub fn output_item_added(&mut self, output_index: usize, item: Value) -> Value {
        self.emit(
            ResponsesEvent::OutputItemAdded,
            json!({"output_index": output_index, "item": item}),
        )
    }

    pub fn content_part_added(&mut self, item_id: &str, output_index: usize) -> Value {
        self.emit(
            ResponsesEvent::ContentPartAdded,
            json!({
                "item_id": item_id,
                "output_index": output_index,
                "content_index": 0,
                "part": {"type": "output_text", "text": ""},
            }),
        )
    }

    pub fn output_text_delta(&mut self, item_id: &str, output_index: usize, delta: &str) -> Value {
        self.emit(
            ResponsesEvent::OutputTextDelta,
            json!({
                "item_id": item_id,
                "output_index": output_index,
                "content_index": 0,
                "delta": delta,
            }),
        )
    }

    pub fn tool_call_delta(&mut self, item_id: &str, output_index: usize, delta: &str) -> Value {
        self.emit(
            ResponsesEvent::ToolCallDelta,
            json!({
                "item_id": item_id,
                "output_index": output_index,
                "delta": delta,
            }),
        )
    }

    pub fn output_item_done(&mut self, output_index: usize, item: Value) -> Value {
        self.emit(
            ResponsesEvent::OutputItemDone,
            json!({"output_index": output_index, "item": item}),
        )
    }

    pub fn done(&mut self) -> Value {
        self.emit(ResponsesEvent::Done, json!({}))
    }
}
