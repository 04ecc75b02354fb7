use serde::{Deserialize, Serialize};

/// Wire protocol spoken on a pipeline edge (client side or provider side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderProtocol {
    #[serde(rename = "openai-chat")]
    OpenAiChat,
    #[serde(rename = "openai-responses")]
    OpenAiResponses,
    #[serde(rename = "anthropic-messages")]
    AnthropicMessages,
    #[serde(rename = "gemini-chat")]
    GeminiChat,
}

impl ProviderProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderProtocol::OpenAiChat => "openai-chat",
            ProviderProtocol::OpenAiResponses => "openai-responses",
            ProviderProtocol::AnthropicMessages => "anthropic-messages",
            ProviderProtocol::GeminiChat => "gemini-chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai-chat" | "openai_chat" => Some(ProviderProtocol::OpenAiChat),
            "openai-responses" | "openai_responses" => Some(ProviderProtocol::OpenAiResponses),
            "anthropic-messages" | "anthropic_messages" => Some(ProviderProtocol::AnthropicMessages),
            "gemini-chat" | "gemini_chat" => Some(ProviderProtocol::GeminiChat),
            _ => None,
        }
    }
}

/// Upstream provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Openai,
    Responses,
    Anthropic,
    Gemini,
    Iflow,
    Glm,
    Qwen,
    Lmstudio,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Openai => "openai",
            ProviderType::Responses => "responses",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Gemini => "gemini",
            ProviderType::Iflow => "iflow",
            ProviderType::Glm => "glm",
            ProviderType::Qwen => "qwen",
            ProviderType::Lmstudio => "lmstudio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderType::Openai),
            "responses" => Some(ProviderType::Responses),
            "anthropic" => Some(ProviderType::Anthropic),
            "gemini" => Some(ProviderType::Gemini),
            "iflow" => Some(ProviderType::Iflow),
            "glm" => Some(ProviderType::Glm),
            "qwen" => Some(ProviderType::Qwen),
            "lmstudio" => Some(ProviderType::Lmstudio),
            _ => None,
        }
    }

    /// Fixed providerType → providerProtocol relation.
    pub fn protocol(&self) -> ProviderProtocol {
        match self {
            ProviderType::Openai
            | ProviderType::Glm
            | ProviderType::Qwen
            | ProviderType::Iflow
            | ProviderType::Lmstudio => ProviderProtocol::OpenAiChat,
            ProviderType::Responses => ProviderProtocol::OpenAiResponses,
            ProviderType::Anthropic => ProviderProtocol::AnthropicMessages,
            ProviderType::Gemini => ProviderProtocol::GeminiChat,
        }
    }

    /// Default request path appended to the provider base URL.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            ProviderType::Openai
            | ProviderType::Glm
            | ProviderType::Qwen
            | ProviderType::Iflow
            | ProviderType::Lmstudio => "/v1/chat/completions",
            ProviderType::Responses => "/v1/responses",
            ProviderType::Anthropic => "/v1/messages",
            ProviderType::Gemini => "/v1beta/models",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    #[default]
    Chat,
    Passthrough,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Chat => "chat",
            ProcessMode::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    #[default]
    Auto,
    Always,
    Never,
}
