use serde_json::{Map, Value, json};

use crate::result::now_ms;

/// OpenAI Responses ↔ OpenAI Chat Completions codec.
///
/// Requests flatten `instructions`/`input` items into chat messages; the
/// reverse direction assembles a completed Responses payload that the SSE
/// simulator can replay for streaming clients.
#[derive(Debug, Clone, Default)]
pub struct ResponsesChatCodec;

impl ResponsesChatCodec {
    /// Responses request → chat request.
    pub fn responses_request_to_chat(&self, request: &Value) -> Value {
        let mut out = Map::new();
        if let Some(model) = request.get("model") {
            out.insert("model".to_string(), model.clone());
        }

        let mut messages = Vec::new();
        if let Some(instructions) = request.get("instructions").and_then(Value::as_str) {
            messages.push(json!({"role": "system", "content": instructions}));
        }

        match request.get("input") {
            Some(Value::String(text)) => {
                messages.push(json!({"role": "user", "content": text}));
            }
            Some(Value::Array(items)) => {
                for item in items {
                    messages.extend(map_input_item(item));
                }
            }
            _ => {}
        }
        out.insert("messages".to_string(), Value::Array(messages));

        if let Some(tools) = request.get("tools").and_then(Value::as_array) {
            let mapped: Vec<Value> = tools.iter().filter_map(map_responses_tool).collect();
            if !mapped.is_empty() {
                out.insert("tools".to_string(), Value::Array(mapped));
            }
        }

        for (source, target) in [
            ("max_output_tokens", "max_tokens"),
            ("temperature", "temperature"),
            ("top_p", "top_p"),
            ("stream", "stream"),
        ] {
            if let Some(value) = request.get(source) {
                out.insert(target.to_string(), value.clone());
            }
        }

        Value::Object(out)
    }

    /// Chat completion response → completed Responses payload.
    pub fn chat_response_to_responses(&self, response: &Value) -> Value {
        let choice = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());
        let message = choice.and_then(|c| c.get("message")).unwrap_or(&Value::Null);

        let mut output = Vec::new();
        if let Some(text) = message.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            output.push(json!({
                "type": "message",
                "id": "message_0",
                "role": "assistant",
                "status": "completed",
                "content": [{"type": "output_text", "text": text, "annotations": []}],
            }));
        }
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for (index, call) in calls.iter().enumerate() {
                let function = call.get("function").unwrap_or(&Value::Null);
                output.push(json!({
                    "type": "function_call",
                    "id": call.get("id").cloned()
                        .unwrap_or_else(|| Value::String(format!("tool_{index}"))),
                    "call_id": call.get("id").cloned().unwrap_or(Value::Null),
                    "name": function.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": function.get("arguments").cloned()
                        .unwrap_or_else(|| Value::String("{}".to_string())),
                    "status": "completed",
                }));
            }
        }

        let created = response
            .get("created")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| now_ms() / 1000);

        let mut out = Map::new();
        out.insert(
            "id".to_string(),
            response.get("id").cloned().unwrap_or(json!("response")),
        );
        out.insert("object".to_string(), json!("response"));
        out.insert("created_at".to_string(), json!(created));
        if let Some(model) = response.get("model") {
            out.insert("model".to_string(), model.clone());
        }
        out.insert("status".to_string(), json!("completed"));
        out.insert("output".to_string(), Value::Array(output));

        if let Some(Value::Object(usage)) = response.get("usage") {
            let mut mapped = Map::new();
            for (key, value) in usage {
                let target = match key.as_str() {
                    "prompt_tokens" => "input_tokens",
                    "completion_tokens" => "output_tokens",
                    other => other,
                };
                mapped.insert(target.to_string(), value.clone());
            }
            out.insert("usage".to_string(), Value::Object(mapped));
        }

        Value::Object(out)
    }
}

fn map_input_item(item: &Value) -> Vec<Value> {
    match item.get("type").and_then(Value::as_str) {
        None | Some("message") => {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = input_item_text(item.get("content"));
            vec![json!({"role": role, "content": text})]
        }
        Some("function_call") => {
            let arguments = item
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::String("{}".to_string()));
            vec![json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": item.get("call_id").or_else(|| item.get("id")).cloned()
                        .unwrap_or(Value::Null),
                    "type": "function",
                    "function": {
                        "name": item.get("name").cloned().unwrap_or(Value::Null),
                        "arguments": arguments,
                    },
                }],
            })]
        }
        Some("function_call_output") => {
            vec![json!({
                "role": "tool",
                "tool_call_id": item.get("call_id").cloned().unwrap_or(Value::Null),
                "content": item.get("output").cloned().unwrap_or(json!("")),
            })]
        }
        _ => Vec::new(),
    }
}

fn input_item_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn map_responses_tool(tool: &Value) -> Option<Value> {
    // Responses tools carry name/parameters at the top level.
    let name = tool.get("name").and_then(Value::as_str)?;
    let mut function = Map::new();
    function.insert("name".to_string(), Value::String(name.to_string()));
    if let Some(description) = tool.get("description") {
        function.insert("description".to_string(), description.clone());
    }
    if let Some(parameters) = tool.get("parameters") {
        function.insert("parameters".to_string(), parameters.clone());
    }
    Some(json!({"type": "function", "function": function}))
}
