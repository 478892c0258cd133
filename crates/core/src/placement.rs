//! Paragraph extraction, image slot computation and image splicing.
//!
//! Everything here is a pure function over line-oriented markdown text.
//! A *slot* is the paragraph index after which one image is inserted, or
//! `None` for "append at document end".
//!
//! Across every slot branch one rule holds: when a document has three or
//! more paragraphs, no image is placed after the last paragraph.

use crate::job::ImageDescriptor;

/// Lines starting with this marker are headings and never part of a paragraph.
pub const HEADING_MARKER: char = '#';

/// Notice inserted when images are enabled but none could be produced.
pub const MISSING_IMAGE_NOTICE: &str =
    "**<span style=\"color:red;\">Please add an image here!</span>**";

/// A contiguous run of non-blank, non-heading lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// The paragraph's lines joined with `\n`, as they appear in the source.
    pub text: String,
    /// Index of the paragraph's first line.
    pub start_line: usize,
    /// Index of the paragraph's last line (inclusive).
    pub end_line: usize,
}

// ---------------------------------------------------------------------------
// Paragraph extraction
// ---------------------------------------------------------------------------

fn is_break_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with(HEADING_MARKER)
}

/// Split `text` into paragraphs.
///
/// Blank lines and heading lines terminate the current paragraph without
/// becoming part of any paragraph.
pub fn extract_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut start_line = 0;
    let mut line_count = 0;

    for (i, line) in text.split('\n').enumerate() {
        line_count = i + 1;
        if is_break_line(line) {
            if !current.is_empty() {
                paragraphs.push(Paragraph {
                    text: current.join("\n"),
                    start_line,
                    end_line: i - 1,
                });
                current.clear();
            }
            continue;
        }
        if current.is_empty() {
            start_line = i;
        }
        current.push(line);
    }

    if !current.is_empty() {
        paragraphs.push(Paragraph {
            text: current.join("\n"),
            start_line,
            end_line: line_count - 1,
        });
    }

    paragraphs
}

// ---------------------------------------------------------------------------
// Slot computation
// ---------------------------------------------------------------------------

/// Decide which paragraph boundary receives each of `target_count` images.
///
/// The returned vector always has exactly `target_count` entries.
///
/// | paragraphs | targets          | slots                                   |
/// |------------|------------------|-----------------------------------------|
/// | 0          | any              | all `None`                              |
/// | 1          | any              | all `0`                                 |
/// | 2          | 1 / 2 / 3        | `[0]` / `[0,1]` / `[0,0,1]`             |
/// | 2          | n > 3            | `n-1` times `0`, then `1`               |
/// | p >= 3     | n > p            | `0..=p-2`, rest at `(p-2)/2`, sorted    |
/// | p >= 3     | 1                | `[0]`                                   |
/// | 3          | 3                | `[0,1,1]`                               |
/// | p >= 4     | 3                | `[0, p/2, p-2]`                         |
/// | p >= 3     | otherwise        | `min(floor(i*(p-1)/n), p-2)`            |
pub fn compute_image_slots(paragraph_count: usize, target_count: usize) -> Vec<Option<usize>> {
    if target_count == 0 {
        return Vec::new();
    }

    match paragraph_count {
        0 => vec![None; target_count],
        1 => vec![Some(0); target_count],
        2 => {
            let mut slots = vec![Some(0); target_count];
            if target_count >= 2 {
                slots[target_count - 1] = Some(1);
            }
            slots
        }
        p if p < target_count => {
            let last_allowed = p - 2;
            let mut slots: Vec<usize> = (0..=last_allowed).collect();
            let overflow_slot = last_allowed.min(last_allowed / 2);
            slots.resize(target_count, overflow_slot);
            slots.sort_unstable();
            slots.into_iter().map(Some).collect()
        }
        _ if target_count == 1 => vec![Some(0)],
        3 if target_count == 3 => vec![Some(0), Some(1), Some(1)],
        p if target_count == 3 => vec![Some(0), Some(p / 2), Some(p - 2)],
        p => {
            let step = (p - 1) as f64 / target_count as f64;
            (0..target_count)
                .map(|i| Some(((i as f64 * step).floor() as usize).min(p - 2)))
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Splicing
// ---------------------------------------------------------------------------

/// Markdown reference line for an image. The caption is deliberately empty;
/// the image summary is kept in metadata only.
pub fn image_reference(image: &ImageDescriptor) -> String {
    format!("![]({})", image.path.display())
}

/// Insert image references into `text` after their target paragraphs.
///
/// Images are grouped by insertion line (`paragraph.end_line + 1`) and the
/// groups are spliced from the highest line index to the lowest, so the
/// input order of `images` across different paragraphs does not matter.
/// Within a group, input order is preserved. Each reference is flanked by
/// one blank line on each side. Images without a paragraph index are
/// appended after the last line; images pointing past the last paragraph
/// are dropped.
pub fn inject_images(text: &str, images: &[ImageDescriptor]) -> String {
    if images.is_empty() {
        return text.to_string();
    }

    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    let paragraphs = extract_paragraphs(text);

    let mut groups: std::collections::BTreeMap<usize, Vec<String>> = Default::default();
    let mut trailing = Vec::new();

    for image in images {
        match image.paragraph_index {
            None => trailing.push(image_reference(image)),
            Some(idx) => {
                if let Some(paragraph) = paragraphs.get(idx) {
                    groups
                        .entry(paragraph.end_line + 1)
                        .or_default()
                        .push(image_reference(image));
                }
            }
        }
    }

    for (line_idx, refs) in groups.into_iter().rev() {
        let block: Vec<String> = refs
            .into_iter()
            .flat_map(|r| [String::new(), r, String::new()])
            .collect();
        lines.splice(line_idx..line_idx, block);
    }

    if !trailing.is_empty() {
        lines.push(String::new());
        for r in trailing {
            lines.push(String::new());
            lines.push(r);
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

/// Insert [`MISSING_IMAGE_NOTICE`] after the first ordinary (non-blank,
/// non-heading) line.
pub fn add_missing_image_notice(text: &str) -> String {
    let mut out = Vec::new();
    let mut inserted = false;

    for line in text.split('\n') {
        out.push(line.to_string());
        if !inserted && !is_break_line(line) {
            inserted = true;
            out.push(String::new());
            out.push(MISSING_IMAGE_NOTICE.to_string());
            out.push(String::new());
        }
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
