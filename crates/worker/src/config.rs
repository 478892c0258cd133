use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Worker process settings. Generation settings are loaded separately
/// through [`quill_core::config::GenerationSettings::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub topics_file: Option<PathBuf>,
    pub poll_interval: Duration,
    pub retry_failed: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topics_file: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_failed: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `QUILL_TOPICS_FILE`      | unset   |
    /// | `QUILL_POLL_INTERVAL_MS` | `1000`  |
    /// | `QUILL_RETRY_FAILED`     | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_ms = get("QUILL_POLL_INTERVAL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        Self {
            topics_file: get("QUILL_TOPICS_FILE").map(PathBuf::from),
            poll_interval: Duration::from_millis(poll_ms),
            retry_failed: get("QUILL_RETRY_FAILED")
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }
}

/// Non-blank trimmed lines of `text`.
pub fn parse_topics(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Topics from `file` when given, otherwise from `args`.
pub fn load_topics(file: Option<&Path>, args: &[String]) -> anyhow::Result<Vec<String>> {
    let topics = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read topics file {}: {e}", path.display())
            })?;
            parse_topics(&text)
        }
        None => parse_topics(&args.join("\n")),
    };

    if topics.is_empty() {
        anyhow::bail!("No topics given: set QUILL_TOPICS_FILE or pass topics as arguments");
    }
    Ok(topics)
}
