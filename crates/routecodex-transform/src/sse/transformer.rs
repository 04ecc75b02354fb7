use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use routecodex_protocol::ResponsesEvent;

use super::events::EventSink;

#[derive(Debug, Clone)]
struct ChoiceState {
    output_index: usize,
    item_id: String,
    text: String,
    part_added: bool,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    output_index: usize,
    item_id: String,
    name: String,
    arguments: String,
}

/// Live driver: accumulates OpenAI chat streaming chunks into the Responses
/// event stream. Mirrors the replay simulator's event shapes exactly.
#[derive(Debug, Default)]
pub struct ChatToResponsesStream {
    sink: EventSink,
    started: bool,
    finished: bool,
    id: String,
    model: String,
    created: u64,
    next_output_index: usize,
    choices: BTreeMap<u64, ChoiceState>,
    tool_calls: BTreeMap<(u64, u64), ToolCallState>,
    usage: Option<Value>,
    finish_reason: Option<String>,
}

impl ChatToResponsesStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &Value) -> Vec<Value> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        if let Some(id) = chunk.get("id").and_then(Value::as_str) {
            self.id = id.to_string();
        }
        if let Some(model) = chunk.get("model").and_then(Value::as_str) {
            self.model = model.to_string();
        }
        if let Some(created) = chunk.get("created").and_then(Value::as_u64) {
            self.created = created;
        }
        if let Some(usage) = chunk.get("usage")
            && !usage.is_null()
        {
            self.usage = Some(usage.clone());
        }

        if !self.started {
            self.started = true;
            events.push(
                self.sink
                    .response_event(ResponsesEvent::Created, self.skeleton("in_progress")),
            );
            events.push(
                self.sink
                    .response_event(ResponsesEvent::InProgress, self.skeleton("in_progress")),
            );
        }

        let choices = chunk
            .get("choices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for choice in &choices {
            let choice_index = choice.get("index").and_then(Value::as_u64).unwrap_or(0);
            let delta = choice.get("delta").unwrap_or(&Value::Null);

            if let Some(content) = delta.get("content").and_then(Value::as_str)
                && !content.is_empty()
            {
                self.emit_text(&mut events, choice_index, content);
            }

            if let Some(tool_deltas) = delta.get("tool_calls").and_then(Value::as_array) {
                for tool_delta in tool_deltas {
                    self.emit_tool_delta(&mut events, choice_index, tool_delta);
                }
            }

            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.finish_reason = Some(reason.to_string());
            }
        }

        events
    }

    /// End-of-stream: close every open item, then `response.completed` with
    /// the aggregated usage, then `response.done`.
    pub fn finalize(&mut self) -> Vec<Value> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(
                self.sink
                    .response_event(ResponsesEvent::Created, self.skeleton("in_progress")),
            );
            events.push(
                self.sink
                    .response_event(ResponsesEvent::InProgress, self.skeleton("in_progress")),
            );
        }

        let mut items: Vec<(usize, Value)> = Vec::new();
        for state in self.choices.values() {
            items.push((state.output_index, message_item(state)));
        }
        for state in self.tool_calls.values() {
            items.push((state.output_index, tool_item(state)));
        }
        items.sort_by_key(|(index, _)| *index);

        for (output_index, item) in &items {
            events.push(self.sink.output_item_done(*output_index, item.clone()));
        }

        let mut response = self.skeleton("completed");
        if let Value::Object(map) = &mut response {
            map.insert(
                "output".to_string(),
                Value::Array(items.into_iter().map(|(_, item)| item).collect()),
            );
            if let Some(usage) = &self.usage {
                map.insert("usage".to_string(), usage.clone());
            }
        }
        events.push(self.sink.response_event(ResponsesEvent::Completed, response));
        events.push(self.sink.done());
        events
    }

    fn emit_text(&mut self, events: &mut Vec<Value>, choice_index: u64, content: &str) {
        if !self.choices.contains_key(&choice_index) {
            let output_index = self.next_output_index;
            self.next_output_index += 1;
            let item_id = format!("message_{choice_index}");
            events.push(self.sink.output_item_added(
                output_index,
                json!({
                    "type": "message",
                    "id": item_id,
                    "role": "assistant",
                    "status": "in_progress",
                    "content": [],
                }),
            ));
            self.choices.insert(
                choice_index,
                ChoiceState {
                    output_index,
                    item_id,
                    text: String::new(),
                    part_added: false,
                },
            );
        }

        let state = self.choices.get_mut(&choice_index).expect("choice state");
        if !state.part_added {
            state.part_added = true;
            let item_id = state.item_id.clone();
            let output_index = state.output_index;
            events.push(self.sink.content_part_added(&item_id, output_index));
        }
        let state = self.choices.get_mut(&choice_index).expect("choice state");
        state.text.push_str(content);
        let item_id = state.item_id.clone();
        let output_index = state.output_index;
        events.push(self.sink.output_text_delta(&item_id, output_index, content));
    }

    fn emit_tool_delta(&mut self, events: &mut Vec<Value>, choice_index: u64, tool_delta: &Value) {
        let tool_index = tool_delta.get("index").and_then(Value::as_u64).unwrap_or(0);
        let key = (choice_index, tool_index);
        let function = tool_delta.get("function").unwrap_or(&Value::Null);
        let name = function.get("name").and_then(Value::as_str);
        let arguments = function
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("");

        if !self.tool_calls.contains_key(&key) {
            let output_index = self.next_output_index;
            self.next_output_index += 1;
            let item_id = tool_delta
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("tool_{choice_index}_{tool_index}"));
            events.push(self.sink.output_item_added(
                output_index,
                json!({
                    "type": "function_call",
                    "id": item_id,
                    "call_id": item_id,
                    "name": name.unwrap_or(""),
                    "arguments": "",
                    "status": "in_progress",
                }),
            ));
            self.tool_calls.insert(
                key,
                ToolCallState {
                    output_index,
                    item_id,
                    name: name.unwrap_or("").to_string(),
                    arguments: String::new(),
                },
            );
        }

        let state = self.tool_calls.get_mut(&key).expect("tool state");
        if let Some(name) = name
            && !name.is_empty()
        {
            state.name = name.to_string();
        }
        if !arguments.is_empty() {
            state.arguments.push_str(arguments);
            let item_id = state.item_id.clone();
            let output_index = state.output_index;
            events.push(self.sink.tool_call_delta(&item_id, output_index, arguments));
        }
    }

    fn skeleton(&self, status: &str) -> Value {
        let id = if self.id.is_empty() {
            "response".to_string()
        } else {
            self.id.clone()
        };
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(id));
        map.insert("object".to_string(), json!("response"));
        map.insert("created_at".to_string(), json!(self.created));
        map.insert("model".to_string(), json!(self.model));
        map.insert("status".to_string(), json!(status));
        map.insert("output".to_string(), json!([]));
        map.insert(
            "stop_reason".to_string(),
            match &self.finish_reason {
                Some(reason) => json!(reason),
                None => Value::Null,
            },
        );
        Value::Object(map)
    }
}

fn message_item(state: &ChoiceState) -> Value {
    json!({
        "type": "message",
        "id": state.item_id,
        "role": "assistant",
        "status": "completed",
        "content": [{"type": "output_text", "text": state.text, "annotations": []}],
    })
}

fn tool_item(state: &ToolCallState) -> Value {
    json!({
        "type": "function_call",
        "id": state.item_id,
        "call_id": state.item_id,
        "name": state.name,
        "arguments": state.arguments,
        "status": "completed",
    })
}
