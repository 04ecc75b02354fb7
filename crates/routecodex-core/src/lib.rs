//! Pipeline core: blueprint model, module registry, virtual router, and the
//! runtime that executes a blueprint's node chain for one request.

pub mod blueprint;
pub mod context;
pub mod module;
pub mod nodes;
pub mod router;
pub mod runtime;

pub use blueprint::{BlueprintDocument, NodeDescriptor, NodeKind, PipelineBlueprint, PipelineDescriptor};
pub use context::{PipelineContext, PipelineExecutionInput};
pub use module::{ModuleRegistry, PipelineModule, config_hash, spawn_idle_sweeper};
pub use router::{
    ProviderTarget, RouteTargetPool, RouterConfig, RouterProviderConfig, VirtualRouter,
    parse_target_key,
};
pub use runtime::{PipelineOutcome, PipelineRuntime};
