//! Pure domain logic for batch document generation.
//!
//! Nothing in this crate performs I/O. It holds the paragraph placement
//! engine, prompt and style composition, naming helpers, configuration
//! types and the batch-job data model shared by the other crates.

pub mod config;
pub mod error;
pub mod job;
pub mod naming;
pub mod placement;
pub mod prompts;
pub mod types;
