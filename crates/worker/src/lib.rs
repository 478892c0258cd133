//! `quill-worker` library crate.
//!
//! Holds the binary's configuration so it can be tested. The entrypoint
//! lives in `main.rs`.

pub mod config;
