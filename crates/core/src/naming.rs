//! Titles, slugs and file names derived from generated content.

use std::sync::LazyLock;

use regex::Regex;

/// Title used when an article has no non-blank line.
pub const UNTITLED_ARTICLE: &str = "Untitled article";

/// Prefix of temporary files removed after a successful render.
pub const TEMP_FILE_PREFIX: &str = "temp_";

/// Extensions accepted for downloaded images.
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

const MAX_STEM_CHARS: usize = 50;
const MAX_SLUG_CHARS: usize = 40;

static HEADING_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s*").expect("valid regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));
static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"));

/// First non-blank line of `article` with heading markers and emphasis
/// removed.
pub fn extract_article_title(article: &str) -> String {
    let Some(line) = article.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return UNTITLED_ARTICLE.to_string();
    };
    let title = HEADING_PREFIX.replace(line, "");
    let title = BOLD.replace_all(&title, "$1");
    let title = ITALIC.replace_all(&title, "$1");
    let title = title.trim();
    if title.is_empty() {
        UNTITLED_ARTICLE.to_string()
    } else {
        title.to_string()
    }
}

/// File-system safe stem for a document title.
pub fn safe_document_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .take(MAX_STEM_CHARS)
        .collect();
    let stem = stem.trim();
    if stem.is_empty() {
        UNTITLED_ARTICLE.to_string()
    } else {
        stem.to_string()
    }
}

/// ASCII slug for a topic, used in generated image file names.
pub fn topic_slug(topic: &str) -> String {
    let slug = NON_SLUG.replace_all(topic.trim(), "_");
    let slug: String = slug.trim_matches('_').chars().take(MAX_SLUG_CHARS).collect();
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug
    }
}

/// Image extension taken from a URL path, `jpg` when absent or unknown.
pub fn url_image_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string())
}

/// Distinct name for a URL image downloaded during a batch.
pub fn temp_url_filename(extension: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{TEMP_FILE_PREFIX}url_{}_{}.{extension}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

/// Whether a file should be removed once the document is rendered.
pub fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with(TEMP_FILE_PREFIX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- titles --

    #[test]
    fn title_strips_markdown() {
        assert_eq!(extract_article_title("\n\n# **Rust** in *practice*\nbody"), "Rust in practice");
        assert_eq!(extract_article_title("Plain first line"), "Plain first line");
    }

    #[test]
    fn empty_article_is_untitled() {
        assert_eq!(extract_article_title("  \n \n"), UNTITLED_ARTICLE);
        assert_eq!(extract_article_title("###"), UNTITLED_ARTICLE);
    }

    #[test]
    fn stem_removes_reserved_characters_and_truncates() {
        assert_eq!(safe_document_stem("a/b:c?d"), "abcd");
        assert_eq!(safe_document_stem(&"x".repeat(80)).len(), 50);
        assert_eq!(safe_document_stem("???"), UNTITLED_ARTICLE);
    }

    // -- slugs --

    #[test]
    fn slug_replaces_non_ascii_runs() {
        assert_eq!(topic_slug("Solar power: the future!"), "Solar_power_the_future");
        assert_eq!(topic_slug("人工智能"), "topic");
        assert_eq!(topic_slug(&"ab".repeat(30)).len(), 40);
    }

    // -- url files --

    #[test]
    fn url_extension_detection() {
        assert_eq!(url_image_extension("https://x.io/a/b.PNG?size=2"), "png");
        assert_eq!(url_image_extension("https://x.io/a/b.webp"), "webp");
        assert_eq!(url_image_extension("https://x.io/a/b.svg"), "jpg");
        assert_eq!(url_image_extension("https://x.io/image"), "jpg");
    }

    #[test]
    fn temp_filenames_are_distinct() {
        let a = temp_url_filename("png");
        let b = temp_url_filename("png");
        assert_ne!(a, b);
        assert!(a.starts_with("temp_url_"));
        assert!(a.ends_with(".png"));
        assert!(is_temp_file(&a));
        assert!(!is_temp_file("comfyui_x.png"));
    }
}
