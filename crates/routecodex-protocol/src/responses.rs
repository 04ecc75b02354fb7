use serde_json::{Map, Value};

/// OpenAI Responses stream event names emitted by the simulator and the
/// live transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsesEvent {
    Created,
    InProgress,
    OutputItemAdded,
    ContentPartAdded,
    OutputTextDelta,
    ToolCallDelta,
    OutputItemDone,
    Completed,
    Done,
}

impl ResponsesEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponsesEvent::Created => "response.created",
            ResponsesEvent::InProgress => "response.in_progress",
            ResponsesEvent::OutputItemAdded => "response.output_item.added",
            ResponsesEvent::ContentPartAdded => "response.content_part.added",
            ResponsesEvent::OutputTextDelta => "response.output_text.delta",
            ResponsesEvent::ToolCallDelta => "response.tool_call.delta",
            ResponsesEvent::OutputItemDone => "response.output_item.done",
            ResponsesEvent::Completed => "response.completed",
            ResponsesEvent::Done => "response.done",
        }
    }
}

/// Assemble one event payload: `type`, `sequence_number`, plus event fields.
pub fn event_payload(event: ResponsesEvent, sequence_number: u64, fields: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(event.as_str().to_string()));
    map.insert("sequence_number".to_string(), Value::from(sequence_number));
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            map.insert(key, value);
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_carries_type_and_sequence() {
        let payload = event_payload(
            ResponsesEvent::OutputTextDelta,
            7,
            json!({"delta": "hi", "item_id": "message_0"}),
        );
        assert_eq!(payload["type"], "response.output_text.delta");
        assert_eq!(payload["sequence_number"], 7);
        assert_eq!(payload["delta"], "hi");
    }
}
