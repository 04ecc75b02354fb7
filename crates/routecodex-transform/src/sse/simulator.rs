use serde_json::{Value, json};

use routecodex_protocol::ResponsesEvent;

use super::events::EventSink;

pub const MIN_CHUNK_SIZE: usize = 32;
pub const MAX_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsesSseConfig {
    /// Delta chunk size for text and stringified tool-call arguments.
    pub chunk_size: usize,
}

impl Default for ResponsesSseConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ResponsesSseConfig {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
        }
    }

    /// Honors `ROUTECODEX_RESPONSES_TOOLCALL_DELTA_CHUNK`; out-of-range or
    /// unparseable overrides are coerced back into `[32, 1024]`.
    pub fn from_env() -> Self {
        let raw = std::env::var("ROUTECODEX_RESPONSES_TOOLCALL_DELTA_CHUNK").ok();
        match raw.and_then(|value| value.trim().parse::<usize>().ok()) {
            Some(value) => Self::with_chunk_size(value),
            None => Self::default(),
        }
    }
}

/// Replay driver: expand a completed Responses payload into the canonical
/// event sequence so clients see incremental delivery.
pub fn simulate_responses_sse(payload: &Value, config: &ResponsesSseConfig) -> Vec<Value> {
    let mut sink = EventSink::new();
    let mut events = Vec::new();

    events.push(sink.response_event(ResponsesEvent::Created, skeleton(payload, "in_progress")));
    events.push(sink.response_event(ResponsesEvent::InProgress, skeleton(payload, "in_progress")));

    let output = payload
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for (output_index, item) in output.iter().enumerate() {
        let item_id = item_id(item, output_index);
        events.push(sink.output_item_added(output_index, item.clone()));

        if let Some(arguments) = tool_arguments(item) {
            for chunk in chunk_str(&arguments, config.chunk_size) {
                events.push(sink.tool_call_delta(&item_id, output_index, chunk));
            }
        } else {
            let text = item_text(item);
            if !text.is_empty() {
                events.push(sink.content_part_added(&item_id, output_index));
                for chunk in chunk_str(&text, config.chunk_size) {
                    events.push(sink.output_text_delta(&item_id, output_index, chunk));
                }
            }
        }

        events.push(sink.output_item_done(output_index, item.clone()));
    }

    events.push(sink.response_event(ResponsesEvent::Completed, completed(payload)));
    events.push(sink.done());
    events
}

fn skeleton(payload: &Value, status: &str) -> Value {
    let mut response = payload.clone();
    if let Value::Object(map) = &mut response {
        map.insert("status".to_string(), json!(status));
        map.insert("output".to_string(), json!([]));
    }
    response
}

fn completed(payload: &Value) -> Value {
    let mut response = payload.clone();
    if let Value::Object(map) = &mut response {
        map.insert("status".to_string(), json!("completed"));
    }
    response
}

fn item_id(item: &Value, output_index: usize) -> String {
    item.get("id")
        .or_else(|| item.get("message").and_then(|m| m.get("id")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("item_{output_index}"))
}

/// Stringified arguments when the item is a tool call, `None` otherwise.
fn tool_arguments(item: &Value) -> Option<String> {
    let kind = item.get("type").and_then(Value::as_str).unwrap_or("message");
    if kind != "function_call" && kind != "tool_call" {
        return None;
    }
    match item.get("arguments") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
        None => Some("{}".to_string()),
    }
}

fn item_text(item: &Value) -> String {
    let content = item
        .get("content")
        .or_else(|| item.get("message").and_then(|m| m.get("content")));
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join(""),
        _ => String::new(),
    }
}

fn chunk_str(text: &str, chunk_size: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    let bytes = text.len();
    while start < bytes {
        let mut end = (start + chunk_size).min(bytes);
        while end < bytes && !text.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_types(events: &[Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn single_message_event_order_and_sequence() {
        let payload = json!({
            "id": "r1",
            "model": "m",
            "created": 1,
            "output": [{"type": "message", "message": {"role": "assistant", "content": [{"text": "hi"}]}}],
        });
        let events = simulate_responses_sse(&payload, &ResponsesSseConfig::default());
        assert_eq!(
            event_types(&events),
            vec![
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_item.done",
                "response.completed",
                "response.done",
            ]
        );
        for (index, event) in events.iter().enumerate() {
            assert_eq!(event["sequence_number"], (index + 1) as u64);
        }
        assert_eq!(events[4]["delta"], "hi");
    }

    #[test]
    fn tool_call_arguments_are_chunked() {
        let arguments = "x".repeat(100);
        let payload = json!({
            "id": "r1",
            "output": [{"type": "function_call", "id": "t1", "name": "calc", "arguments": arguments}],
        });
        let config = ResponsesSseConfig::with_chunk_size(32);
        let events = simulate_responses_sse(&payload, &config);
        let deltas: Vec<&Value> = events
            .iter()
            .filter(|e| e["type"] == "response.tool_call.delta")
            .collect();
        assert_eq!(deltas.len(), 4); // 32+32+32+4
        let rebuilt: String = deltas
            .iter()
            .map(|e| e["delta"].as_str().unwrap())
            .collect();
        assert_eq!(rebuilt.len(), 100);
        for delta in &deltas {
            assert_eq!(delta["item_id"], "t1");
        }
    }

    #[test]
    fn chunk_size_is_clamped() {
        assert_eq!(ResponsesSseConfig::with_chunk_size(1).chunk_size, 32);
        assert_eq!(ResponsesSseConfig::with_chunk_size(4096).chunk_size, 1024);
        assert_eq!(ResponsesSseConfig::with_chunk_size(256).chunk_size, 256);
    }

    #[test]
    fn created_skeleton_has_empty_output() {
        let payload = json!({"id": "r1", "output": [{"type": "message", "content": "x"}]});
        let events = simulate_responses_sse(&payload, &ResponsesSseConfig::default());
        assert_eq!(events[0]["response"]["status"], "in_progress");
        assert_eq!(events[0]["response"]["output"], json!([]));
        let completed = &events[events.len() - 2];
        assert_eq!(completed["response"]["status"], "completed");
        assert_eq!(completed["response"]["output"].as_array().unwrap().len(), 1);
    }
}
