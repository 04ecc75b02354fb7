mod compatibility;
mod llmswitch;
mod provider;
mod workflow;

pub use compatibility::CompatibilityModule;
pub use llmswitch::LlmSwitchModule;
pub use provider::ProviderNode;
pub use workflow::WorkflowModule;

use std::collections::HashMap;
use std::sync::Arc;

use routecodex_provider::{ProviderConfig, ProviderTransport};

use crate::module::ModuleRegistry;

/// Extras key where the upstream streaming decision lives.
pub(crate) const EXTRA_UPSTREAM_STREAMING: &str = "upstream_streaming";
/// Extras key where the client-facing protocol is recorded.
pub(crate) const EXTRA_CLIENT_PROTOCOL: &str = "client_protocol";
/// Extras key holding the request's tool schemas for the normalizer.
pub(crate) const EXTRA_TOOLS: &str = "tools";
/// Extras key carrying a per-request auth override.
pub(crate) const EXTRA_AUTH_OVERRIDE: &str = "auth_override";

/// Register the built-in node implementations under their blueprint names.
pub fn register_builtin_modules(
    registry: &mut ModuleRegistry,
    transport: Arc<ProviderTransport>,
    provider_configs: HashMap<String, ProviderConfig>,
) {
    registry.register("llmswitch", LlmSwitchModule::factory());
    registry.register("workflow", WorkflowModule::factory());
    registry.register("compatibility", CompatibilityModule::factory());
    registry.register(
        "generic-http",
        ProviderNode::factory(transport, provider_configs),
    );
}
