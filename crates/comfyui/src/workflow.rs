//! Job-template graph loading and per-attempt substitution.
//!
//! A template is a JSON object mapping node ids to `{"inputs": {...}}`,
//! optionally wrapped as `{"prompt": {...}}`. String inputs may contain
//! the placeholders below; any input named `seed` is always overwritten.

use std::path::{Path, PathBuf};

use quill_core::prompts::StyledPrompts;
use rand::Rng;
use serde_json::{Map, Value};

pub const POSITIVE_PLACEHOLDER: &str = "{{positive_prompt}}";
pub const NEGATIVE_PLACEHOLDER: &str = "{{negative_prompt}}";
pub const FILENAME_PREFIX_PLACEHOLDER: &str = "{{filename_prefix}}";

/// A node graph keyed by node id.
pub type PromptGraph = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("ComfyUI workflow path is not configured")]
    NotConfigured,

    #[error("ComfyUI workflow file does not exist: {0}")]
    Missing(PathBuf),

    #[error("Failed to read ComfyUI workflow {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ComfyUI workflow is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ComfyUI workflow must be an object of nodes or contain a \"prompt\" object")]
    Shape,
}

/// Read and validate the template graph at `path`.
pub async fn load_prompt_graph(path: &str) -> Result<PromptGraph, WorkflowError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(WorkflowError::NotConfigured);
    }

    let path = Path::new(path).to_path_buf();
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkflowError::Missing(path));
        }
        Err(source) => return Err(WorkflowError::Io { path, source }),
    };

    parse_prompt_graph(serde_json::from_str(&raw)?)
}

/// Unwrap an optional `{"prompt": ...}` envelope and check the shape.
pub fn parse_prompt_graph(raw: Value) -> Result<PromptGraph, WorkflowError> {
    let Value::Object(mut root) = raw else {
        return Err(WorkflowError::Shape);
    };
    match root.remove("prompt") {
        Some(Value::Object(graph)) => Ok(graph),
        Some(_) => Err(WorkflowError::Shape),
        None => Ok(root),
    }
}

/// `auto_<YYYYMMDD>` for the current local date.
pub fn generated_filename_prefix() -> String {
    format!("auto_{}", chrono::Local::now().format("%Y%m%d"))
}

/// The configured seed, or a fresh random one in `1..=i32::MAX` when the
/// configured value is negative.
pub fn resolve_seed(configured: i64) -> i64 {
    if configured >= 0 {
        configured
    } else {
        rand::rng().random_range(1..=i64::from(i32::MAX))
    }
}

/// Substitute prompts, seed and filename prefix into a copy of `template`.
pub fn build_payload(
    template: &PromptGraph,
    prompts: &StyledPrompts,
    seed: i64,
    filename_prefix: &str,
) -> PromptGraph {
    let replacements = [
        (POSITIVE_PLACEHOLDER, prompts.positive.as_str()),
        (NEGATIVE_PLACEHOLDER, prompts.negative.as_str()),
        (FILENAME_PREFIX_PLACEHOLDER, filename_prefix),
    ];

    let mut graph = template.clone();
    for node in graph.values_mut() {
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };

        for (key, value) in inputs.iter_mut() {
            if key == "seed" {
                *value = Value::from(seed);
                continue;
            }
            let Value::String(text) = value else {
                continue;
            };
            if key == "filename_prefix" && !text.contains(FILENAME_PREFIX_PLACEHOLDER) {
                *text = filename_prefix.to_string();
                continue;
            }
            for (placeholder, actual) in replacements {
                if text.contains(placeholder) {
                    *text = text.replace(placeholder, actual);
                }
            }
        }
    }
    graph
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
