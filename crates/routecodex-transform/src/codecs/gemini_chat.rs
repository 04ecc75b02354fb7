use serde_json::{Map, Value, json};

/// OpenAI Chat Completions ↔ Gemini generate-content codec.
///
/// The request keeps `model` at the top level for the transport, which
/// routes it into the Gemini URL path rather than the body.
#[derive(Debug, Clone, Default)]
pub struct GeminiChatCodec;

impl GeminiChatCodec {
    /// Chat request → Gemini generate-content request.
    pub fn chat_request_to_gemini(&self, request: &Value) -> Value {
        let mut system_texts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        if let Some(messages) = request.get("messages").and_then(Value::as_array) {
            for message in messages {
                let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
                match role {
                    "system" | "developer" => {
                        if let Some(text) = message.get("content").and_then(Value::as_str) {
                            system_texts.push(text.to_string());
                        }
                    }
                    "assistant" => {
                        if let Some(content) = map_assistant_content(message) {
                            contents.push(content);
                        }
                    }
                    "tool" => {
                        contents.push(map_tool_response(message));
                    }
                    _ => {
                        let text = message.get("content").and_then(Value::as_str).unwrap_or("");
                        contents.push(json!({
                            "role": "user",
                            "parts": [{"text": text}],
                        }));
                    }
                }
            }
        }

        let mut out = Map::new();
        if let Some(model) = request.get("model") {
            out.insert("model".to_string(), model.clone());
        }
        out.insert("contents".to_string(), Value::Array(contents));
        if !system_texts.is_empty() {
            out.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": system_texts.join("\n")}]}),
            );
        }

        if let Some(declarations) = map_function_declarations(request.get("tools")) {
            out.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
        }

        if let Some(config) = map_generation_config(request) {
            out.insert("generationConfig".to_string(), config);
        }

        Value::Object(out)
    }

    /// Gemini generate-content response → chat completion response.
    pub fn gemini_response_to_chat(&self, response: &Value) -> Value {
        let candidates = response
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let choices: Vec<Value> = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| map_candidate(candidate, index))
            .collect();

        let mut out = Map::new();
        out.insert(
            "id".to_string(),
            response
                .get("responseId")
                .cloned()
                .unwrap_or_else(|| json!("response")),
        );
        out.insert("object".to_string(), json!("chat.completion"));
        out.insert("created".to_string(), json!(0));
        if let Some(model) = response.get("modelVersion") {
            out.insert("model".to_string(), model.clone());
        }
        out.insert("choices".to_string(), Value::Array(choices));

        if let Some(usage) = response.get("usageMetadata") {
            out.insert(
                "usage".to_string(),
                json!({
                    "prompt_tokens": usage.get("promptTokenCount").cloned().unwrap_or(json!(0)),
                    "completion_tokens": usage.get("candidatesTokenCount").cloned().unwrap_or(json!(0)),
                    "total_tokens": usage.get("totalTokenCount").cloned().unwrap_or(json!(0)),
                }),
            );
        }

        Value::Object(out)
    }
}

fn map_assistant_content(message: &Value) -> Option<Value> {
    let mut parts: Vec<Value> = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        parts.push(json!({"text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").unwrap_or(&Value::Null);
            let arguments = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            parts.push(json!({
                "functionCall": {
                    "name": function.get("name").cloned().unwrap_or(Value::Null),
                    "args": args,
                },
            }));
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(json!({"role": "model", "parts": parts}))
}

fn map_tool_response(message: &Value) -> Value {
    let name = message
        .get("tool_call_id")
        .cloned()
        .unwrap_or_else(|| json!("tool"));
    let raw = message.get("content").and_then(Value::as_str).unwrap_or("");
    let response: Value =
        serde_json::from_str(raw).unwrap_or_else(|_| json!({"result": raw}));
    json!({
        "role": "user",
        "parts": [{"functionResponse": {"name": name, "response": response}}],
    })
}

fn map_function_declarations(tools: Option<&Value>) -> Option<Vec<Value>> {
    let tools = tools?.as_array()?;
    let declarations: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            let name = function.get("name")?;
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), name.clone());
            if let Some(description) = function.get("description") {
                declaration.insert("description".to_string(), description.clone());
            }
            if let Some(parameters) = function.get("parameters") {
                declaration.insert("parameters".to_string(), parameters.clone());
            }
            Some(Value::Object(declaration))
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(declarations)
    }
}

fn map_generation_config(request: &Value) -> Option<Value> {
    let mut config = Map::new();
    if let Some(max) = request
        .get("max_completion_tokens")
        .or_else(|| request.get("max_tokens"))
    {
        config.insert("maxOutputTokens".to_string(), max.clone());
    }
    if let Some(temperature) = request.get("temperature") {
        config.insert("temperature".to_string(), temperature.clone());
    }
    if let Some(top_p) = request.get("top_p") {
        config.insert("topP".to_string(), top_p.clone());
    }
    match request.get("stop") {
        Some(Value::String(stop)) => {
            config.insert("stopSequences".to_string(), json!([stop]));
        }
        Some(Value::Array(stops)) => {
            config.insert("stopSequences".to_string(), Value::Array(stops.clone()));
        }
        _ => {}
    }
    if config.is_empty() {
        None
    } else {
        Some(Value::Object(config))
    }
}

fn map_candidate(candidate: &Value, index: usize) -> Value {
    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut texts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    for part in &parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            texts.push(text);
        }
        if let Some(call) = part.get("functionCall") {
            let args = call.get("args").cloned().unwrap_or(json!({}));
            let arguments = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
            tool_calls.push(json!({
                "id": format!("call_{index}_{}", tool_calls.len()),
                "type": "function",
                "function": {
                    "name": call.get("name").cloned().unwrap_or(Value::Null),
                    "arguments": arguments,
                },
            }));
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert(
        "content".to_string(),
        if texts.is_empty() {
            Value::Null
        } else {
            Value::String(texts.concat())
        },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls.clone()));
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else {
        map_finish_reason(
            candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("STOP"),
        )
    };

    json!({
        "index": index,
        "message": message,
        "finish_reason": finish_reason,
    })
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => "content_filter",
        _ => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_user_messages_convert() {
        let codec = GeminiChatCodec;
        let request = json!({
            "model": "gemini-pro",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"},
            ],
            "max_tokens": 64,
            "temperature": 0.5,
            "stop": ["END"],
        });
        let out = codec.chat_request_to_gemini(&request);
        assert_eq!(out["model"], "gemini-pro");
        assert_eq!(
            out["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(out["contents"][0]["parts"][0]["text"], "Hi");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(out["generationConfig"]["stopSequences"], json!(["END"]));
    }

    #[test]
    fn assistant_tool_calls_become_function_call_parts() {
        let codec = GeminiChatCodec;
        let request = json!({
            "messages": [
                {"role": "assistant", "content": "checking",
                 "tool_calls": [{"id": "t1", "function": {"name": "calc", "arguments": "{\"a\":1}"}}]},
                {"role": "tool", "tool_call_id": "t1", "content": "{\"sum\":1}"},
            ],
        });
        let out = codec.chat_request_to_gemini(&request);
        let model_turn = &out["contents"][0];
        assert_eq!(model_turn["role"], "model");
        assert_eq!(model_turn["parts"][0]["text"], "checking");
        assert_eq!(model_turn["parts"][1]["functionCall"]["name"], "calc");
        assert_eq!(model_turn["parts"][1]["functionCall"]["args"], json!({"a": 1}));

        let tool_turn = &out["contents"][1];
        assert_eq!(tool_turn["role"], "user");
        assert_eq!(
            tool_turn["parts"][0]["functionResponse"]["response"],
            json!({"sum": 1})
        );
    }

    #[test]
    fn function_tools_become_declarations() {
        let codec = GeminiChatCodec;
        let request = json!({
            "messages": [],
            "tools": [{"type": "function", "function": {
                "name": "calc", "description": "adds",
                "parameters": {"type": "object"},
            }}],
        });
        let out = codec.chat_request_to_gemini(&request);
        let declaration = &out["tools"][0]["functionDeclarations"][0];
        assert_eq!(declaration["name"], "calc");
        assert_eq!(declaration["parameters"], json!({"type": "object"}));
    }

    #[test]
    fn candidate_text_maps_to_choice() {
        let codec = GeminiChatCodec;
        let response = json!({
            "responseId": "r1",
            "modelVersion": "gemini-pro",
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello"}]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4},
        });
        let out = codec.gemini_response_to_chat(&response);
        assert_eq!(out["id"], "r1");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(
            out["usage"],
            json!({"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4})
        );
    }

    #[test]
    fn function_call_candidate_maps_to_tool_calls() {
        let codec = GeminiChatCodec;
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "calc", "args": {"a": 1}}},
                ]},
                "finishReason": "STOP",
            }],
        });
        let out = codec.gemini_response_to_chat(&response);
        let call = &out["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["name"], "calc");
        assert_eq!(call["function"]["arguments"], "{\"a\":1}");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn safety_stop_maps_to_content_filter() {
        let codec = GeminiChatCodec;
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"text": "…"}]},
                "finishReason": "SAFETY",
            }],
        });
        let out = codec.gemini_response_to_chat(&response);
        assert_eq!(out["choices"][0]["finish_reason"], "content_filter");
    }
}
