//! Production of one illustrated document from one topic.
//!
//! Steps, in order: write the article, compute image slots from its
//! paragraphs, place pre-supplied images (downloading URL ones), derive
//! one visual blueprint, generate the remaining images slot by slot,
//! splice everything into the markdown and render it.
//!
//! Only article writing and rendering can fail the topic. Image problems
//! are absorbed into the outcome's [`ImageRecord`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quill_comfyui::generator::{GenerationOutcome, GenerationRequest, ImageGenerator};
use quill_core::config::GenerationSettings;
use quill_core::job::{
    ImageDescriptor, ImageRecord, ImageSource, PreSuppliedImage, TopicOutcome,
};
use quill_core::naming::{extract_article_title, is_temp_file, safe_document_stem};
use quill_core::placement::{
    add_missing_image_notice, compute_image_slots, extract_paragraphs, inject_images, Paragraph,
};
use quill_core::prompts::{
    build_visual_prompts, derive_keyword, fallback_paragraph_summary, topic_fallback_summary,
    PromptPair, FALLBACK_NEGATIVE_PROMPT,
};

use crate::author::Author;
use crate::error::PipelineError;
use crate::fetch::ImageFetcher;
use crate::render::DocumentRenderer;

/// A pre-supplied image resolved to a local file.
struct LocalImage {
    path: PathBuf,
    summary: String,
    source: ImageSource,
}

pub struct TopicGenerator {
    author: Arc<dyn Author>,
    images: Arc<ImageGenerator>,
    fetcher: Arc<dyn ImageFetcher>,
    renderer: Arc<dyn DocumentRenderer>,
}

impl TopicGenerator {
    pub fn new(
        author: Arc<dyn Author>,
        images: Arc<ImageGenerator>,
        fetcher: Arc<dyn ImageFetcher>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            author,
            images,
            fetcher,
            renderer,
        }
    }

    pub fn image_generator(&self) -> &ImageGenerator {
        &self.images
    }

    pub async fn generate(
        &self,
        topic: &str,
        pre_supplied: &[PreSuppliedImage],
        settings: &GenerationSettings,
    ) -> Result<TopicOutcome, PipelineError> {
        let article = self.author.write_article(topic, &settings.author).await?;
        let title = extract_article_title(&article);
        let paragraphs = extract_paragraphs(&article);

        let target = settings.target_image_count();
        let slots = compute_image_slots(paragraphs.len(), target);
        tracing::debug!(topic, paragraphs = paragraphs.len(), target, ?slots, "Image slots computed");

        let mut placed: Vec<ImageDescriptor> = Vec::new();
        let mut records: Vec<ImageRecord> = Vec::new();

        if target > 0 {
            let (local, mut failures) = self.resolve_pre_supplied(topic, pre_supplied, settings).await;
            records.append(&mut failures);

            for (order, image) in local.into_iter().enumerate().take(slots.len()) {
                let descriptor = ImageDescriptor {
                    path: image.path,
                    summary: image.summary,
                    paragraph_index: slots[order],
                    source: image.source,
                    order,
                };
                records.push(record_for(&descriptor));
                placed.push(descriptor);
            }

            let supplied = placed.len();
            if supplied < target {
                self.generate_missing(
                    topic,
                    &article,
                    &paragraphs,
                    &slots,
                    supplied,
                    settings,
                    &mut placed,
                    &mut records,
                )
                .await;
            }
        }

        let markdown = if !settings.enable_image {
            article.clone()
        } else if placed.is_empty() {
            add_missing_image_notice(&article)
        } else {
            let linked: Vec<ImageDescriptor> = placed
                .iter()
                .map(|image| ImageDescriptor {
                    path: link_target(&image.path, &settings.output_directory),
                    ..image.clone()
                })
                .collect();
            inject_images(&article, &linked)
        };

        let stem = safe_document_stem(&title);
        let artifact = self
            .renderer
            .render(&stem, &markdown, &settings.output_directory)
            .await?;

        if self.renderer.embeds_images() {
            remove_temp_images(&placed).await;
        }

        // Failed downloads keep their requested order, which may collide
        // with a generated slot; renumber so orders are unique.
        records.sort_by_key(|r| r.order);
        for (order, record) in records.iter_mut().enumerate() {
            record.order = order;
        }
        Ok(TopicOutcome {
            topic: topic.to_string(),
            title,
            artifact,
            image_count: placed.len(),
            images: records,
        })
    }

    // ---- private helpers ----

    /// Local files for every usable pre-supplied image, ordered by their
    /// requested order, plus error records for URL downloads that failed.
    async fn resolve_pre_supplied(
        &self,
        topic: &str,
        pre_supplied: &[PreSuppliedImage],
        settings: &GenerationSettings,
    ) -> (Vec<LocalImage>, Vec<ImageRecord>) {
        let mut ordered: Vec<(usize, &PreSuppliedImage)> = pre_supplied
            .iter()
            .enumerate()
            .map(|(position, image)| (image.order_or(position), image))
            .collect();
        ordered.sort_by_key(|(order, _)| *order);

        let timeout = Duration::from_secs(settings.url_fetch_timeout_secs);
        let mut local = Vec::new();
        let mut failures = Vec::new();

        for (order, image) in ordered {
            match image {
                PreSuppliedImage::Uploaded { path, .. } => local.push(LocalImage {
                    path: path.clone(),
                    summary: image.summary().to_string(),
                    source: ImageSource::UserUploaded,
                }),
                PreSuppliedImage::Url { url, .. } => {
                    match self
                        .fetcher
                        .fetch(url, &settings.output_directory, timeout)
                        .await
                    {
                        Ok(path) => local.push(LocalImage {
                            path,
                            summary: image.summary().to_string(),
                            source: ImageSource::UrlFetched,
                        }),
                        Err(e) => {
                            tracing::warn!(topic, url = %url, error = %e, "URL image download failed");
                            failures.push(ImageRecord {
                                source: ImageSource::Error,
                                path: None,
                                summary: Some(image.summary().to_string()),
                                paragraph_index: None,
                                order,
                                error: Some(e.to_string()),
                                generation: None,
                            });
                        }
                    }
                }
            }
        }

        (local, failures)
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_missing(
        &self,
        topic: &str,
        article: &str,
        paragraphs: &[Paragraph],
        slots: &[Option<usize>],
        supplied: usize,
        settings: &GenerationSettings,
        placed: &mut Vec<ImageDescriptor>,
        records: &mut Vec<ImageRecord>,
    ) {
        let base_prompts = match self
            .author
            .visual_blueprint(topic, article, &settings.author)
            .await
        {
            Ok(raw) => {
                let blueprint = raw.normalize(topic);
                tracing::info!(
                    topic,
                    template = %blueprint.template,
                    keyword = %derive_keyword(&blueprint),
                    "Visual blueprint derived",
                );
                Some(build_visual_prompts(&blueprint))
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Visual blueprint failed, using plain prompts");
                None
            }
        };

        for (order, slot) in slots.iter().copied().enumerate().skip(supplied) {
            let summary = match slot.and_then(|idx| paragraphs.get(idx)) {
                Some(paragraph) => self.paragraph_summary(topic, paragraph, settings).await,
                None => topic_fallback_summary(topic),
            };

            // The summary is the whole positive prompt; the blueprint only
            // contributes its template and negative prompt.
            let prompts = PromptPair {
                template: base_prompts.as_ref().and_then(|p| p.template.clone()),
                positive: summary.clone(),
                negative: base_prompts
                    .as_ref()
                    .map(|p| p.negative.clone())
                    .unwrap_or_else(|| FALLBACK_NEGATIVE_PROMPT.to_string()),
            };

            let outcome = self
                .images
                .generate(GenerationRequest {
                    topic,
                    prompts: &prompts,
                    style: &settings.style,
                    config: &settings.comfy,
                    output_dir: &settings.output_directory,
                })
                .await;

            match outcome {
                GenerationOutcome::Generated { path, metadata } => {
                    let descriptor = ImageDescriptor {
                        path,
                        summary,
                        paragraph_index: slot,
                        source: ImageSource::Generated,
                        order,
                    };
                    let mut record = record_for(&descriptor);
                    record.generation = Some(metadata);
                    records.push(record);
                    placed.push(descriptor);
                }
                other => {
                    tracing::warn!(topic, order, "No image produced for slot");
                    let error = match &other {
                        GenerationOutcome::Disabled => "Image backend disabled",
                        GenerationOutcome::Backpressure => "Image backend busy",
                        _ => "Image generation failed",
                    };
                    let (_, metadata) = other.into_parts();
                    records.push(ImageRecord {
                        source: ImageSource::Failed,
                        path: None,
                        summary: Some(summary),
                        paragraph_index: slot,
                        order,
                        error: Some(error.to_string()),
                        generation: Some(metadata).filter(|m| !m.errors.is_empty()),
                    });
                }
            }
        }
    }

    async fn paragraph_summary(
        &self,
        topic: &str,
        paragraph: &Paragraph,
        settings: &GenerationSettings,
    ) -> String {
        match self
            .author
            .summarize_paragraph(topic, &paragraph.text, &settings.author)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => fallback_paragraph_summary(&paragraph.text, topic),
            Err(e) => {
                tracing::warn!(topic, error = %e, "Paragraph summary failed, using fallback");
                fallback_paragraph_summary(&paragraph.text, topic)
            }
        }
    }
}

/// Path written into the document for `path`: relative to the document's
/// directory when the image lives below it, absolute otherwise.
fn link_target(path: &Path, document_dir: &Path) -> PathBuf {
    if let Ok(relative) = path.strip_prefix(document_dir) {
        return relative.to_path_buf();
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn record_for(image: &ImageDescriptor) -> ImageRecord {
    ImageRecord {
        source: image.source,
        path: Some(image.path.clone()),
        summary: Some(image.summary.clone()),
        paragraph_index: image.paragraph_index,
        order: image.order,
        error: None,
        generation: None,
    }
}

async fn remove_temp_images(images: &[ImageDescriptor]) {
    for image in images {
        let is_temp = image
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_temp_file);
        if !is_temp {
            continue;
        }
        if let Err(e) = tokio::fs::remove_file(&image.path).await {
            tracing::debug!(path = %image.path.display(), error = %e, "Failed to remove temporary image");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
