//! Visual blueprints, prompt building and style templates.
//!
//! A [`VisualBlueprint`] is the structured description of desired visual
//! content an LLM derives once per article. It is turned into a
//! positive/negative [`PromptPair`] through a template preset, and a
//! configured style is appended right before submission.

use serde::{Deserialize, Serialize};

use crate::config::StyleSettings;

// ---------------------------------------------------------------------------
// Visual template presets
// ---------------------------------------------------------------------------

/// Prompt fragments framing a blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualPreset {
    pub id: &'static str,
    pub positive_prefix: &'static str,
    pub positive_suffix: &'static str,
    pub negative: &'static str,
}

/// Preset used when a blueprint names an unknown template.
pub const DEFAULT_VISUAL_TEMPLATE: &str = "editorial";

pub const VISUAL_PRESETS: &[VisualPreset] = &[
    VisualPreset {
        id: "portrait",
        positive_prefix: "ultra detailed cinematic portrait of",
        positive_suffix: "sharp focus, 8k, masterpiece, award-winning photography, intricate details, volumetric lighting, high dynamic range",
        negative: "lowres, blurry, worst quality, low quality, jpeg artifacts, double face, deformed, cropped, watermark, nsfw",
    },
    VisualPreset {
        id: "urban_story",
        positive_prefix: "documentary style wide shot of",
        positive_suffix: "cinematic storytelling, atmospheric haze, dramatic lighting, realistic photography, depth of field, editorial style, moody ambience",
        negative: "lowres, cartoon, painting, illustration, abstract, blurry, distorted, watermark",
    },
    VisualPreset {
        id: "technology",
        positive_prefix: "futuristic concept art of",
        positive_suffix: "highly detailed, sleek design, glows, holographic interface, volumetric light, digital art, 8k render, cinematic lighting",
        negative: "lowres, blurry, noisy, childlike, hand-drawn, distorted, watermark",
    },
    VisualPreset {
        id: "nature",
        positive_prefix: "breathtaking landscape of",
        positive_suffix: "golden hour lighting, ultra realistic, depth of field, atmospheric perspective, highly detailed, award-winning photography",
        negative: "lowres, oversaturated, blurry, distorted, extra limbs, watermark, cartoon",
    },
    VisualPreset {
        id: "editorial",
        positive_prefix: "editorial style illustration of",
        positive_suffix: "clean composition, modern infographic aesthetics, vector inspired, balanced color palette, professional magazine layout, sharp details",
        negative: "lowres, childish drawing, messy typography, watermark, depressing filter, distorted text",
    },
    VisualPreset {
        id: "abstract",
        positive_prefix: "abstract conceptual illustration of",
        positive_suffix: "minimalist shapes, clean vector art, modern gradients, smooth lighting, design magazine aesthetic, crisp edges, high resolution",
        negative: "lowres, messy composition, noisy texture, random clutter, illegible text, watermark",
    },
];

/// Look up a preset, falling back to [`DEFAULT_VISUAL_TEMPLATE`].
pub fn visual_preset(id: &str) -> &'static VisualPreset {
    VISUAL_PRESETS
        .iter()
        .find(|p| p.id == id)
        .or_else(|| VISUAL_PRESETS.iter().find(|p| p.id == DEFAULT_VISUAL_TEMPLATE))
        .unwrap_or(&VISUAL_PRESETS[0])
}

// ---------------------------------------------------------------------------
// Style templates
// ---------------------------------------------------------------------------

/// Style fragments appended to every generation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleTemplate {
    pub id: &'static str,
    pub positive: &'static str,
    pub negative: &'static str,
}

/// Style template id meaning "only use the free-form style text".
pub const CUSTOM_STYLE: &str = "custom";

pub const STYLE_TEMPLATES: &[StyleTemplate] = &[
    StyleTemplate {
        id: CUSTOM_STYLE,
        positive: "",
        negative: "",
    },
    StyleTemplate {
        id: "realistic_photo",
        positive: "highly detailed realistic photography, natural lighting, sharp focus",
        negative: "cartoon, illustration, painting, lowres, oversaturated, cgi",
    },
    StyleTemplate {
        id: "cyberpunk",
        positive: "cyberpunk, neon rain, dramatic lighting, futuristic cityscape",
        negative: "lowres, watercolor, sketch, plain background",
    },
    StyleTemplate {
        id: "business",
        positive: "business illustration, clean vector style, professional tone, modern minimal branding",
        negative: "messy, chaotic, childish, graffiti",
    },
];

/// Look up a style template; unknown ids behave like [`CUSTOM_STYLE`].
pub fn style_template(id: &str) -> &'static StyleTemplate {
    STYLE_TEMPLATES
        .iter()
        .find(|t| t.id == id)
        .unwrap_or(&STYLE_TEMPLATES[0])
}

// ---------------------------------------------------------------------------
// Blueprint
// ---------------------------------------------------------------------------

/// Negative prompt used when no blueprint is available.
pub const FALLBACK_NEGATIVE_PROMPT: &str = "lowres, blurry, watermark";

/// Structured visual description of an article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualBlueprint {
    pub template: String,
    pub subject: String,
    pub scene: String,
    pub mood: String,
    pub style: String,
    pub lighting: String,
    pub composition: String,
    pub details: String,
    pub negative: String,
}

impl VisualBlueprint {
    /// Fill every empty field with its fallback and coerce unknown
    /// templates to [`DEFAULT_VISUAL_TEMPLATE`].
    pub fn normalize(self, topic: &str) -> Self {
        fn or(value: String, fallback: String) -> String {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                fallback
            } else {
                trimmed.to_string()
            }
        }

        let template = if VISUAL_PRESETS.iter().any(|p| p.id == self.template) {
            self.template
        } else {
            DEFAULT_VISUAL_TEMPLATE.to_string()
        };

        Self {
            template,
            subject: or(self.subject, topic.to_string()),
            scene: or(self.scene, format!("story about {topic}")),
            mood: or(self.mood, "dramatic and inspiring".into()),
            style: or(self.style, "cinematic, highly detailed".into()),
            lighting: or(self.lighting, "soft cinematic lighting".into()),
            composition: or(self.composition, "balanced composition".into()),
            details: or(self.details, "intricate storytelling details".into()),
            negative: or(self.negative, "lowres, blurry, distorted, watermark".into()),
        }
    }
}

/// Positive and negative prompt text for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    /// Visual template the prompts were built from, if any.
    pub template: Option<String>,
    pub positive: String,
    pub negative: String,
}

/// Prompts after the configured style has been merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledPrompts {
    pub positive: String,
    pub negative: String,
    pub style_template: String,
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build prompts from a blueprint and its template preset.
pub fn build_visual_prompts(blueprint: &VisualBlueprint) -> PromptPair {
    let preset = visual_preset(&blueprint.template);

    let positive = join_non_empty([
        preset.positive_prefix,
        &blueprint.subject,
        &blueprint.scene,
        &blueprint.composition,
        &blueprint.details,
        &blueprint.style,
        &blueprint.mood,
        &blueprint.lighting,
        preset.positive_suffix,
    ]);

    let negative = join_non_empty([preset.negative, &blueprint.negative]);

    PromptPair {
        template: Some(preset.id.to_string()),
        positive,
        negative: if negative.is_empty() {
            preset.negative.to_string()
        } else {
            negative
        },
    }
}

/// Append the configured style fragments to `prompts`.
///
/// Original prompt content always comes first. A named template
/// contributes its own fragments followed by any free-form style text;
/// the custom template contributes only the free-form text.
pub fn apply_style(prompts: &PromptPair, style: &StyleSettings) -> StyledPrompts {
    let template = style_template(&style.template);
    let extra_positive = style.positive.trim();
    let extra_negative = style.negative.trim();

    let (style_positive, style_negative) = if template.id == CUSTOM_STYLE {
        (extra_positive.to_string(), extra_negative.to_string())
    } else {
        (
            join_non_empty([template.positive, extra_positive]),
            join_non_empty([template.negative, extra_negative]),
        )
    };

    StyledPrompts {
        positive: join_non_empty([prompts.positive.as_str(), &style_positive]),
        negative: join_non_empty([prompts.negative.as_str(), &style_negative]),
        style_template: template.id.to_string(),
    }
}

/// Short lowercase keyword (first four ASCII words of subject, scene and
/// details), used for logging and stock-photo style lookups.
pub fn derive_keyword(blueprint: &VisualBlueprint) -> String {
    let text = format!(
        "{} {} {}",
        blueprint.subject, blueprint.scene, blueprint.details
    );
    text.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Summary used when the LLM could not summarize a paragraph.
pub fn fallback_paragraph_summary(paragraph: &str, topic: &str) -> String {
    let head: String = paragraph.chars().take(50).collect();
    let head = head.trim();
    if head.is_empty() {
        topic_fallback_summary(topic)
    } else {
        format!("illustration of {head}")
    }
}

/// Summary used for images that are not tied to any paragraph.
pub fn topic_fallback_summary(topic: &str) -> String {
    format!("visual representation of {topic}")
}

// ---------------------------------------------------------------------------
// LLM response parsing
// ---------------------------------------------------------------------------

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) if rest[..pos].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[pos + 1..],
        _ => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a JSON object out of a model response, tolerating code fences
/// and surrounding prose.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    text: &str,
) -> Result<T, serde_json::Error> {
    let cleaned = strip_code_fence(text);
    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(e) => {
            let span = cleaned
                .find('{')
                .zip(cleaned.rfind('}'))
                .filter(|(start, end)| start < end);
            match span {
                Some((start, end)) => serde_json::from_str(&cleaned[start..=end]),
                None => Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
