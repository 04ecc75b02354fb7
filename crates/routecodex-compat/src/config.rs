use serde::{Deserialize, Serialize};

/// Drop `path` from a request when the value at `when_empty` is an empty
/// array/object/string or absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalRemoval {
    pub path: String,
    pub when_empty: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBlacklist {
    /// Sub-keys removed under `tools[].function` and assistant
    /// `messages[].tool_calls[].function`.
    #[serde(default)]
    pub function_keys: Vec<String>,
    #[serde(default)]
    pub conditional_removals: Vec<ConditionalRemoval>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBlacklist {
    /// Dotted paths deleted from non-stream responses.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Paths that may never be stripped, whatever `paths` says.
    #[serde(default = "default_critical_paths")]
    pub critical_paths: Vec<String>,
}

impl Default for ResponseBlacklist {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            critical_paths: default_critical_paths(),
        }
    }
}

pub(crate) fn default_critical_paths() -> Vec<String> {
    [
        "status",
        "output",
        "output_text",
        "choices[].message.content",
        "choices[].message.tool_calls",
        "choices[].finish_reason",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Per-family quirk bundle. Every behavior is independently switchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatProfile {
    pub name: String,
    #[serde(default)]
    pub request_blacklist: Option<RequestBlacklist>,
    #[serde(default)]
    pub response_blacklist: Option<ResponseBlacklist>,
    #[serde(default)]
    pub normalize_tool_args: bool,
}

impl CompatProfile {
    /// No-op profile: payloads pass through untouched.
    pub fn passthrough(name: &str) -> Self {
        Self {
            name: name.to_string(),
            request_blacklist: None,
            response_blacklist: None,
            normalize_tool_args: false,
        }
    }

    /// GLM rejects OpenAI extensions inside function definitions and a
    /// `tool_choice` without tools.
    pub fn glm() -> Self {
        Self {
            name: "glm".to_string(),
            request_blacklist: Some(RequestBlacklist {
                function_keys: vec!["strict".to_string(), "json_schema".to_string()],
                conditional_removals: vec![ConditionalRemoval {
                    path: "tool_choice".to_string(),
                    when_empty: "tools".to_string(),
                }],
            }),
            response_blacklist: Some(ResponseBlacklist::default()),
            normalize_tool_args: true,
        }
    }

    /// LM Studio: identity mappings kept available for future edits; the
    /// response-side tool_calls shape is preserved as-is.
    pub fn lmstudio() -> Self {
        Self {
            name: "lmstudio".to_string(),
            request_blacklist: Some(RequestBlacklist::default()),
            response_blacklist: Some(ResponseBlacklist::default()),
            normalize_tool_args: false,
        }
    }

    pub fn for_name(name: &str) -> Self {
        match name {
            "glm" => Self::glm(),
            "lmstudio" => Self::lmstudio(),
            other => Self::passthrough(other),
        }
    }
}
