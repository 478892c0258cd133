//! Runtime configuration for batch generation.
//!
//! Every struct has serde field defaults so partial JSON documents
//! deserialize cleanly, and a `from_env()` constructor reading the
//! variables listed in its doc table. Values are read through
//! [`from_lookup`](GenerationSettings::from_lookup) so tests can supply a
//! map instead of the process environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_COMFY_SERVER_URL: &str = "http://127.0.0.1:8188";
pub const DEFAULT_QUEUE_SIZE: usize = 2;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// A negative seed asks for a fresh random seed on every attempt.
pub const RANDOM_SEED: i64 = -1;

pub const MIN_QUEUE_SIZE: usize = 1;
pub const MIN_TIMEOUT_SECONDS: u64 = 30;
pub const MIN_MAX_ATTEMPTS: u32 = 1;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;
pub const DEFAULT_IMAGE_COUNT: usize = 1;
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "output";
pub const DEFAULT_URL_FETCH_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com";
pub const DEFAULT_MODEL: &str = "qwen-plus";

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn lookup_string(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn lookup_parsed<T: std::str::FromStr>(lookup: Lookup<'_>, key: &str) -> Option<T> {
    lookup_string(lookup, key).and_then(|v| v.parse().ok())
}

fn lookup_bool(lookup: Lookup<'_>, key: &str) -> Option<bool> {
    lookup_string(lookup, key).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ---------------------------------------------------------------------------
// ComfyConfig
// ---------------------------------------------------------------------------

/// Settings of the remote image-generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComfyConfig {
    pub enabled: bool,
    pub server_url: String,
    /// Process-wide cap on in-flight generation calls.
    pub queue_size: usize,
    /// Bounds both permit acquisition and each attempt's polling deadline.
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub seed: i64,
    /// Job-template graph file. Empty means "not configured".
    pub workflow_path: String,
}

impl Default for ComfyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: DEFAULT_COMFY_SERVER_URL.to_string(),
            queue_size: DEFAULT_QUEUE_SIZE,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            seed: RANDOM_SEED,
            workflow_path: String::new(),
        }
    }
}

impl ComfyConfig {
    /// Clamp values into their valid ranges and strip a trailing `/` from
    /// the server URL.
    pub fn normalized(mut self) -> Self {
        self.queue_size = self.queue_size.max(MIN_QUEUE_SIZE);
        self.timeout_seconds = self.timeout_seconds.max(MIN_TIMEOUT_SECONDS);
        self.max_attempts = self.max_attempts.max(MIN_MAX_ATTEMPTS);
        self.server_url = self.server_url.trim().trim_end_matches('/').to_string();
        if self.server_url.is_empty() {
            self.server_url = DEFAULT_COMFY_SERVER_URL.to_string();
        }
        self.workflow_path = self.workflow_path.trim().to_string();
        self
    }

    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `COMFYUI_ENABLED`         | `true`                   |
    /// | `COMFYUI_SERVER_URL`      | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_QUEUE_SIZE`      | `2`                      |
    /// | `COMFYUI_TIMEOUT_SECONDS` | `180`                    |
    /// | `COMFYUI_MAX_ATTEMPTS`    | `2`                      |
    /// | `COMFYUI_SEED`            | `-1` (random)            |
    /// | `COMFYUI_WORKFLOW_PATH`   | empty                    |
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: lookup_bool(lookup, "COMFYUI_ENABLED").unwrap_or(defaults.enabled),
            server_url: lookup_string(lookup, "COMFYUI_SERVER_URL")
                .unwrap_or(defaults.server_url),
            queue_size: lookup_parsed(lookup, "COMFYUI_QUEUE_SIZE").unwrap_or(defaults.queue_size),
            timeout_seconds: lookup_parsed(lookup, "COMFYUI_TIMEOUT_SECONDS")
                .unwrap_or(defaults.timeout_seconds),
            max_attempts: lookup_parsed(lookup, "COMFYUI_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts),
            seed: lookup_parsed(lookup, "COMFYUI_SEED").unwrap_or(defaults.seed),
            workflow_path: lookup_string(lookup, "COMFYUI_WORKFLOW_PATH")
                .unwrap_or(defaults.workflow_path),
        }
        .normalized()
    }
}

// ---------------------------------------------------------------------------
// StyleSettings
// ---------------------------------------------------------------------------

/// Style merged into every generation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    /// Style template id (`custom`, `realistic_photo`, `cyberpunk`, `business`).
    pub template: String,
    pub positive: String,
    pub negative: String,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            template: crate::prompts::CUSTOM_STYLE.to_string(),
            positive: String::new(),
            negative: String::new(),
        }
    }
}

impl StyleSettings {
    /// | Env Var                  | Default  |
    /// |--------------------------|----------|
    /// | `COMFYUI_STYLE_TEMPLATE` | `custom` |
    /// | `COMFYUI_POSITIVE_STYLE` | empty    |
    /// | `COMFYUI_NEGATIVE_STYLE` | empty    |
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            template: lookup_string(lookup, "COMFYUI_STYLE_TEMPLATE").unwrap_or(defaults.template),
            positive: lookup_string(lookup, "COMFYUI_POSITIVE_STYLE").unwrap_or_default(),
            negative: lookup_string(lookup, "COMFYUI_NEGATIVE_STYLE").unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorSettings
// ---------------------------------------------------------------------------

/// Credentials and models of the text-generation endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Model used for paragraph summaries; `None` reuses [`model`](Self::model).
    pub summary_model: Option<String>,
    /// Custom article prompt. `{topic}` is replaced by the topic.
    pub article_prompt: Option<String>,
}

impl std::fmt::Debug for AuthorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("summary_model", &self.summary_model)
            .field("article_prompt", &self.article_prompt.is_some())
            .finish()
    }
}

impl Default for AuthorSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_DASHSCOPE_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            summary_model: None,
            article_prompt: None,
        }
    }
}

impl AuthorSettings {
    pub fn summary_model(&self) -> &str {
        self.summary_model.as_deref().unwrap_or(&self.model)
    }

    /// | Env Var              | Default                          |
    /// |----------------------|----------------------------------|
    /// | `DASHSCOPE_API_KEY`  | empty                            |
    /// | `DASHSCOPE_BASE_URL` | `https://dashscope.aliyuncs.com` |
    /// | `DEFAULT_MODEL`      | `qwen-plus`                      |
    /// | `SUMMARY_MODEL`      | same as `DEFAULT_MODEL`          |
    /// | `ARTICLE_PROMPT`     | built-in prompt                  |
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            api_key: lookup_string(lookup, "DASHSCOPE_API_KEY").unwrap_or_default(),
            base_url: lookup_string(lookup, "DASHSCOPE_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: lookup_string(lookup, "DEFAULT_MODEL").unwrap_or(defaults.model),
            summary_model: lookup_string(lookup, "SUMMARY_MODEL"),
            article_prompt: lookup_string(lookup, "ARTICLE_PROMPT"),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationSettings
// ---------------------------------------------------------------------------

/// Snapshot of everything one batch run needs.
///
/// Taken once at submission; tasks never observe later changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Size of the per-batch topic worker pool.
    pub max_concurrent_tasks: usize,
    /// Target number of images per document.
    pub image_count: usize,
    pub enable_image: bool,
    pub output_directory: PathBuf,
    pub url_fetch_timeout_secs: u64,
    /// When set, documents are converted with pandoc instead of kept as
    /// markdown.
    pub pandoc_path: Option<String>,
    pub style: StyleSettings,
    pub comfy: ComfyConfig,
    pub author: AuthorSettings,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            image_count: DEFAULT_IMAGE_COUNT,
            enable_image: true,
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            url_fetch_timeout_secs: DEFAULT_URL_FETCH_TIMEOUT_SECS,
            pandoc_path: None,
            style: StyleSettings::default(),
            comfy: ComfyConfig::default(),
            author: AuthorSettings::default(),
        }
    }
}

impl GenerationSettings {
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_tasks = self.max_concurrent_tasks.max(1);
        self.url_fetch_timeout_secs = self.url_fetch_timeout_secs.max(1);
        self.comfy = self.comfy.normalized();
        self
    }

    /// Number of images a topic should end up with.
    pub fn target_image_count(&self) -> usize {
        if self.enable_image {
            self.image_count
        } else {
            0
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default  |
    /// |--------------------------|----------|
    /// | `MAX_CONCURRENT_TASKS`   | `3`      |
    /// | `IMAGE_COUNT`            | `1`      |
    /// | `ENABLE_IMAGE`           | `true`   |
    /// | `OUTPUT_DIRECTORY`       | `output` |
    /// | `URL_FETCH_TIMEOUT_SECS` | `10`     |
    /// | `PANDOC_PATH`            | unset    |
    ///
    /// Plus the variables of [`StyleSettings`], [`ComfyConfig`] and
    /// [`AuthorSettings`].
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_tasks: lookup_parsed(lookup, "MAX_CONCURRENT_TASKS")
                .unwrap_or(defaults.max_concurrent_tasks),
            image_count: lookup_parsed(lookup, "IMAGE_COUNT").unwrap_or(defaults.image_count),
            enable_image: lookup_bool(lookup, "ENABLE_IMAGE").unwrap_or(defaults.enable_image),
            output_directory: lookup_string(lookup, "OUTPUT_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_directory),
            url_fetch_timeout_secs: lookup_parsed(lookup, "URL_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.url_fetch_timeout_secs),
            pandoc_path: lookup_string(lookup, "PANDOC_PATH"),
            style: StyleSettings::from_lookup(lookup),
            comfy: ComfyConfig::from_lookup(lookup),
            author: AuthorSettings::from_lookup(lookup),
        }
        .normalized()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // -- ComfyConfig --

    #[test]
    fn comfy_defaults() {
        let config = ComfyConfig::from_lookup(&lookup_from(&[]));
        assert_eq!(config, ComfyConfig::default());
        assert!(config.enabled);
        assert_eq!(config.queue_size, 2);
        assert_eq!(config.timeout_seconds, 180);
        assert_eq!(config.seed, -1);
    }

    #[test]
    fn normalized_clamps_minimums() {
        let config = ComfyConfig {
            queue_size: 0,
            timeout_seconds: 5,
            max_attempts: 0,
            server_url: "http://gpu:8188/".into(),
            ..ComfyConfig::default()
        }
        .normalized();
        assert_eq!(config.queue_size, 1);
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.server_url, "http://gpu:8188");
    }

    #[test]
    fn comfy_reads_env_values() {
        let config = ComfyConfig::from_lookup(&lookup_from(&[
            ("COMFYUI_ENABLED", "false"),
            ("COMFYUI_QUEUE_SIZE", "4"),
            ("COMFYUI_TIMEOUT_SECONDS", "10"),
            ("COMFYUI_SEED", "42"),
            ("COMFYUI_WORKFLOW_PATH", " flows/t2i.json "),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.queue_size, 4);
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.seed, 42);
        assert_eq!(config.workflow_path, "flows/t2i.json");
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = ComfyConfig::from_lookup(&lookup_from(&[
            ("COMFYUI_QUEUE_SIZE", "many"),
            ("COMFYUI_ENABLED", "maybe"),
        ]));
        assert_eq!(config.queue_size, DEFAULT_QUEUE_SIZE);
        assert!(config.enabled);
    }

    #[test]
    fn partial_json_uses_field_defaults() {
        let config: ComfyConfig = serde_json::from_str(r#"{"queue_size": 5}"#).unwrap();
        assert_eq!(config.queue_size, 5);
        assert_eq!(config.server_url, DEFAULT_COMFY_SERVER_URL);
    }

    // -- GenerationSettings --

    #[test]
    fn generation_settings_from_lookup() {
        let settings = GenerationSettings::from_lookup(&lookup_from(&[
            ("MAX_CONCURRENT_TASKS", "0"),
            ("IMAGE_COUNT", "3"),
            ("OUTPUT_DIRECTORY", "/tmp/docs"),
            ("PANDOC_PATH", "/usr/bin/pandoc"),
            ("COMFYUI_STYLE_TEMPLATE", "cyberpunk"),
            ("SUMMARY_MODEL", "qwen-turbo"),
        ]));
        assert_eq!(settings.max_concurrent_tasks, 1);
        assert_eq!(settings.image_count, 3);
        assert_eq!(settings.output_directory, PathBuf::from("/tmp/docs"));
        assert_eq!(settings.pandoc_path.as_deref(), Some("/usr/bin/pandoc"));
        assert_eq!(settings.style.template, "cyberpunk");
        assert_eq!(settings.author.summary_model(), "qwen-turbo");
        assert_eq!(settings.author.model, DEFAULT_MODEL);
    }

    #[test]
    fn disabled_images_target_zero() {
        let settings = GenerationSettings {
            enable_image: false,
            image_count: 4,
            ..GenerationSettings::default()
        };
        assert_eq!(settings.target_image_count(), 0);
    }

    #[test]
    fn author_debug_redacts_key() {
        let settings = AuthorSettings {
            api_key: "sk-secret".into(),
            ..AuthorSettings::default()
        };
        assert!(!format!("{settings:?}").contains("sk-secret"));
    }
}
