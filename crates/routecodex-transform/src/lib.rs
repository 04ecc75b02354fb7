//! Protocol conversion for the gateway pipeline.
//!
//! Three layers live here: the config-driven transformation engine
//! (dotted-path reshaping of free JSON trees), the pairwise protocol
//! codecs, and the Responses SSE machinery (replay simulator plus the
//! live chat-chunk transformer; both drive one event sink so their
//! output stays identical).

pub mod codecs;
pub mod engine;
pub mod result;
pub mod sse;

pub use codecs::anthropic_openai::AnthropicOpenAiCodec;
pub use codecs::gemini_chat::GeminiChatCodec;
pub use codecs::openai_normalize::{NormalizeConfig, normalize_openai_payload};
pub use codecs::responses_chat::ResponsesChatCodec;
pub use engine::condition::{ConditionOperator, RuleCondition};
pub use engine::path::{get_path, get_path_first, remove_path, set_path};
pub use engine::{
    CombineMode, RuleKind, TransformEngine, TransformationResult, TransformationRule,
};
pub use result::ConversionResult;
pub use sse::simulator::{ResponsesSseConfig, simulate_responses_sse};
pub use sse::transformer::ChatToResponsesStream;
