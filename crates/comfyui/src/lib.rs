//! ComfyUI image generation behind a process-wide admission gate.
//!
//! [`api`] wraps the REST endpoints, [`history`] and [`workflow`] hold the
//! protocol logic, [`gate`] bounds concurrency and [`generator`] drives
//! the submit/poll/retry loop through the [`backend::ImageBackend`] seam.

pub mod api;
pub mod backend;
pub mod gate;
pub mod generator;
pub mod history;
pub mod workflow;
