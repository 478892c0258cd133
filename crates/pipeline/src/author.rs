//! Text generation: articles, visual blueprints and paragraph summaries.
//!
//! [`Author`] is the seam the topic pipeline writes through.
//! [`DashScopeAuthor`] implements it over the DashScope text-generation
//! endpoint (`POST {base}/api/v1/services/aigc/text-generation/generation`).

use std::time::Duration;

use async_trait::async_trait;
use quill_core::config::AuthorSettings;
use quill_core::prompts::{parse_json_response, VisualBlueprint};
use serde::Deserialize;

const GENERATION_PATH: &str = "/api/v1/services/aigc/text-generation/generation";

const ARTICLE_TIMEOUT: Duration = Duration::from_secs(180);
const BLUEPRINT_TIMEOUT: Duration = Duration::from_secs(60);
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);

const BLUEPRINT_ARTICLE_CHARS: usize = 2000;
const SUMMARY_PARAGRAPH_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum AuthorError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("DashScope API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("DashScope API key is not configured")]
    MissingApiKey,

    #[error("DashScope response carried no output text")]
    MissingOutput,

    #[error("Visual blueprint is not valid JSON: {0}")]
    Blueprint(#[from] serde_json::Error),
}

#[async_trait]
pub trait Author: Send + Sync {
    /// Markdown article whose first line is the `#` title.
    async fn write_article(
        &self,
        topic: &str,
        settings: &AuthorSettings,
    ) -> Result<String, AuthorError>;

    /// Raw blueprint for the article. Callers normalize it.
    async fn visual_blueprint(
        &self,
        topic: &str,
        article: &str,
        settings: &AuthorSettings,
    ) -> Result<VisualBlueprint, AuthorError>;

    /// Short concrete visual description of one paragraph.
    async fn summarize_paragraph(
        &self,
        topic: &str,
        paragraph: &str,
        settings: &AuthorSettings,
    ) -> Result<String, AuthorError>;
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn article_prompt(topic: &str, custom: Option<&str>) -> String {
    if let Some(template) = custom.filter(|t| !t.trim().is_empty()) {
        return template.replace("{topic}", topic);
    }
    format!(
        "Write a detailed article about the following title or brief:\n\n\
         {topic}\n\n\
         Requirements:\n\
         1. The first line must be the article title marked with # (Markdown).\n\
         2. Give the article a clear structure with ## subheadings.\n\
         3. Make the content substantial and insightful.\n\
         4. Aim for 800 to 1200 words of fluent, natural prose.\n\
         5. Markdown (#, ##, **) may be used to organize the text.\n\n\
         Start the article directly without any preamble."
    )
}

fn blueprint_prompt(topic: &str, article: &str) -> String {
    let excerpt: String = article.chars().take(BLUEPRINT_ARTICLE_CHARS).collect();
    format!(
        "You are a senior visual director. Read the article below and produce a visual plan \
         for a Stable Diffusion / ComfyUI image.\n\
         Title: {topic}\n\
         Excerpt: {excerpt}\n\n\
         Answer with exactly this JSON structure, every field an English phrase of 4 to 15 words:\n\
         {{\n  \"template\": \"portrait|urban_story|technology|nature|editorial|abstract\",\n  \
         \"subject\": \"...\",\n  \"scene\": \"...\",\n  \"mood\": \"...\",\n  \"style\": \"...\",\n  \
         \"lighting\": \"...\",\n  \"composition\": \"...\",\n  \"details\": \"...\",\n  \
         \"negative\": \"...\"\n}}\n\n\
         Rules:\n\
         1. template must be one of the listed values.\n\
         2. Other fields describe concrete visuals as comma separated phrases.\n\
         3. negative lists elements that must not appear.\n\
         4. Output only the JSON, no explanation and no Markdown."
    )
}

fn summary_prompt(topic: &str, paragraph: &str) -> String {
    let excerpt: String = paragraph.chars().take(SUMMARY_PARAGRAPH_CHARS).collect();
    format!(
        "Read this paragraph from an article about \"{topic}\" and write a visual description \
         of it suitable for image generation.\n\n\
         Requirements:\n\
         1. Describe the main subject, action or scene in 15 to 30 words.\n\
         2. Be concrete: describe what you would see, not abstract ideas.\n\
         3. Focus on objects, people, places, actions and atmosphere.\n\
         4. Output only the description, without quotes or extra text.\n\n\
         Paragraph:\n{excerpt}\n\n\
         Visual description:"
    )
}

// ---------------------------------------------------------------------------
// DashScopeAuthor
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    output: Option<GenerationOutput>,
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    text: Option<String>,
}

/// [`Author`] backed by the DashScope (Qwen) text-generation API.
#[derive(Debug, Clone, Default)]
pub struct DashScopeAuthor {
    client: reqwest::Client,
}

impl DashScopeAuthor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn generate(
        &self,
        settings: &AuthorSettings,
        model: &str,
        prompt: String,
        enable_search: bool,
        timeout: Duration,
    ) -> Result<String, AuthorError> {
        if settings.api_key.is_empty() {
            return Err(AuthorError::MissingApiKey);
        }

        let mut parameters = serde_json::json!({ "result_format": "text" });
        if enable_search {
            parameters["enable_search"] = serde_json::json!(true);
            parameters["search_options"] = serde_json::json!({ "forced_search": true });
        }
        let body = serde_json::json!({
            "model": model,
            "input": { "messages": [{ "role": "user", "content": prompt }] },
            "parameters": parameters,
        });

        let response = self
            .client
            .post(format!("{}{GENERATION_PATH}", settings.base_url))
            .bearer_auth(&settings.api_key)
            .header("X-DashScope-SSE", "disable")
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AuthorError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerationResponse = response.json().await?;
        parsed
            .output
            .and_then(|o| o.text)
            .ok_or(AuthorError::MissingOutput)
    }
}

#[async_trait]
impl Author for DashScopeAuthor {
    async fn write_article(
        &self,
        topic: &str,
        settings: &AuthorSettings,
    ) -> Result<String, AuthorError> {
        let prompt = article_prompt(topic, settings.article_prompt.as_deref());
        self.generate(settings, &settings.model, prompt, true, ARTICLE_TIMEOUT)
            .await
    }

    async fn visual_blueprint(
        &self,
        topic: &str,
        article: &str,
        settings: &AuthorSettings,
    ) -> Result<VisualBlueprint, AuthorError> {
        let raw = self
            .generate(
                settings,
                &settings.model,
                blueprint_prompt(topic, article),
                false,
                BLUEPRINT_TIMEOUT,
            )
            .await?;
        Ok(parse_json_response(&raw)?)
    }

    async fn summarize_paragraph(
        &self,
        topic: &str,
        paragraph: &str,
        settings: &AuthorSettings,
    ) -> Result<String, AuthorError> {
        let raw = self
            .generate(
                settings,
                settings.summary_model(),
                summary_prompt(topic, paragraph),
                false,
                SUMMARY_TIMEOUT,
            )
            .await?;
        Ok(raw.trim().trim_matches(['"', '\'']).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
