//! Protocol vocabulary shared by the router, codecs, and transport:
//! provider/protocol enums with their fixed relation tables, the SSE wire
//! parser and emitter, the Responses event names, and the configurable
//! finish-reason / usage-field mapping tables.

pub mod reasons;
pub mod responses;
pub mod sse;
pub mod types;

pub use reasons::{StopReasonTable, UsageFieldMap};
pub use responses::{ResponsesEvent, event_payload};
pub use sse::{DONE_MARKER, SseEmitter, SseEvent, SseParser};
pub use types::{ProcessMode, ProviderProtocol, ProviderType, StreamingMode};
