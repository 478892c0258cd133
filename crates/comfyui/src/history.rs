//! Interpretation of `GET /history/{prompt_id}` bodies.
//!
//! ComfyUI versions and proxies disagree on the exact shape of history
//! entries, so interpretation is lenient: the entry may be keyed by the
//! prompt id or returned bare, and `outputs` may be an object, an array or
//! a JSON-encoded string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One output image as referenced by a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_image_type")]
    pub kind: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

/// Where a prompt stands according to one history response.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    /// Not recorded yet, still running, or finished without outputs so far.
    Pending,
    /// The backend reported `status.status == "error"`.
    Failed(String),
    /// Non-empty `outputs` value, still in its raw shape.
    Completed(Value),
}

/// Errors turning an `outputs` value into image references.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OutputsError {
    #[error("ComfyUI outputs could not be parsed")]
    Unparsable,

    #[error("ComfyUI outputs have an unsupported structure")]
    Unsupported,

    #[error("No image node found in ComfyUI outputs")]
    NoImages,
}

/// Classify a history response body for `prompt_id`.
///
/// The entry keyed by `prompt_id` wins; otherwise the first object value
/// that carries `outputs`; otherwise the body itself.
pub fn interpret_history(body: &Value, prompt_id: &str) -> HistoryState {
    let Some(root) = body.as_object() else {
        return HistoryState::Pending;
    };

    let entry = root
        .get(prompt_id)
        .and_then(Value::as_object)
        .or_else(|| {
            root.values()
                .filter_map(Value::as_object)
                .find(|v| v.contains_key("outputs"))
        })
        .unwrap_or(root);

    let status = entry.get("status").and_then(Value::as_object);
    if status.and_then(|s| s.get("status")).and_then(Value::as_str) == Some("error") {
        let message = status
            .and_then(|s| s.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("ComfyUI reported an error status");
        return HistoryState::Failed(message.to_string());
    }

    match entry.get("outputs") {
        Some(outputs) if is_populated(outputs) => HistoryState::Completed(outputs.clone()),
        _ => HistoryState::Pending,
    }
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Collect every image reference of an `outputs` value in node order.
///
/// Entries without a usable `filename` are skipped. An empty result is
/// reported as [`OutputsError::NoImages`].
pub fn image_refs(outputs: &Value) -> Result<Vec<ImageRef>, OutputsError> {
    let nodes = normalize_outputs(outputs)?;

    let refs: Vec<ImageRef> = nodes
        .values()
        .flat_map(node_images)
        .filter_map(|image| serde_json::from_value::<ImageRef>(image).ok())
        .filter(|image| !image.filename.is_empty())
        .collect();

    if refs.is_empty() {
        return Err(OutputsError::NoImages);
    }
    Ok(refs)
}

fn normalize_outputs(outputs: &Value) -> Result<Map<String, Value>, OutputsError> {
    match outputs {
        Value::Object(map) => Ok(map.clone()),
        Value::Array(items) => Ok(index_keyed(items)),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Array(items)) => Ok(index_keyed(&items)),
            Ok(_) => Err(OutputsError::Unsupported),
            Err(_) => Err(OutputsError::Unparsable),
        },
        _ => Err(OutputsError::Unsupported),
    }
}

fn index_keyed(items: &[Value]) -> Map<String, Value> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| (i.to_string(), v.clone()))
        .collect()
}

fn node_images(node: &Value) -> Vec<Value> {
    let images_of = |v: &Value| match v {
        Value::Object(map) => map
            .get("images")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    };

    match node {
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map(|parsed| images_of(&parsed))
            .unwrap_or_default(),
        other => images_of(other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // -- interpret_history --

    #[test]
    fn empty_body_is_pending() {
        assert_eq!(interpret_history(&json!({}), "p1"), HistoryState::Pending);
        assert_eq!(interpret_history(&json!(null), "p1"), HistoryState::Pending);
    }

    #[test]
    fn entry_keyed_by_prompt_id_is_used() {
        let body = json!({
            "p1": {"status": {"status": "completed"}, "outputs": {"9": {"images": []}}}
        });
        assert_matches!(interpret_history(&body, "p1"), HistoryState::Completed(_));
    }

    #[test]
    fn error_status_fails_with_message() {
        let body = json!({"p1": {"status": {"status": "error", "message": "OOM"}, "outputs": {}}});
        assert_eq!(
            interpret_history(&body, "p1"),
            HistoryState::Failed("OOM".into())
        );
    }

    #[test]
    fn error_without_message_gets_default() {
        let body = json!({"status": {"status": "error"}});
        assert_matches!(interpret_history(&body, "p1"), HistoryState::Failed(m) if m.contains("error"));
    }

    #[test]
    fn bare_entry_and_foreign_key_are_accepted() {
        let bare = json!({"outputs": {"9": {"images": [{"filename": "a.png"}]}}});
        assert_matches!(interpret_history(&bare, "p1"), HistoryState::Completed(_));

        let foreign = json!({"other": {"outputs": {"9": {}}}});
        assert_matches!(interpret_history(&foreign, "p1"), HistoryState::Completed(_));
    }

    #[test]
    fn completed_without_outputs_is_pending() {
        let body = json!({"p1": {"status": {"status": "completed"}, "outputs": {}}});
        assert_eq!(interpret_history(&body, "p1"), HistoryState::Pending);
    }

    // -- image_refs --

    #[test]
    fn refs_from_object_outputs() {
        let outputs = json!({
            "3": {"text": ["x"]},
            "9": {"images": [{"filename": "a.png", "subfolder": "s", "type": "output"}]}
        });
        let refs = image_refs(&outputs).unwrap();
        assert_eq!(
            refs,
            vec![ImageRef {
                filename: "a.png".into(),
                subfolder: "s".into(),
                kind: "output".into()
            }]
        );
    }

    #[test]
    fn refs_from_array_and_string_outputs() {
        let array = json!([{"images": [{"filename": "a.png"}]}]);
        assert_eq!(image_refs(&array).unwrap()[0].kind, "output");

        let encoded = json!(r#"{"9": "[{\"filename\": \"b.png\"}]"}"#);
        assert_eq!(image_refs(&encoded).unwrap()[0].filename, "b.png");
    }

    #[test]
    fn unparsable_and_imageless_outputs_are_errors() {
        assert_eq!(image_refs(&json!("not json")), Err(OutputsError::Unparsable));
        assert_eq!(image_refs(&json!(42)), Err(OutputsError::Unsupported));
        assert_eq!(
            image_refs(&json!({"9": {"images": [{"subfolder": "x"}]}})),
            Err(OutputsError::NoImages)
        );
    }
}
