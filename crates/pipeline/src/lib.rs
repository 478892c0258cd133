//! Batch article pipeline: authoring, image placement, rendering and the
//! job orchestration around them.

pub mod author;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod topic;

pub use error::PipelineError;
pub use orchestrator::{BatchHandle, BatchOrchestrator};
