//! Manuscript segmentation
//!
//! Splits free-form manuscript text into ordered, titled [`Section`]s in a
//! single forward pass. Header recognition is delegated to
//! [`boundary_classifier`](super::boundary_classifier); this module only
//! tracks the state the classifier needs (blank lines above the current
//! line, whether any content has been seen) and accumulates bodies.
//!
//! Segmentation never fails. Text with no recognizable markers comes back as
//! a single "Section 1".

use crate::models::Section;

use super::boundary_classifier::{
    is_header, is_section_divider, merge_subtitle, subtitle_candidate,
};

/// Normalize line endings and invisible characters that would defeat the
/// line-based heuristics
fn normalize(text: &str) -> String {
    text.trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ")
}

/// Accumulates lines of the section being built
#[derive(Default)]
struct SectionBuilder {
    sections: Vec<Section>,
    pending_title: Option<String>,
    lines: Vec<String>,
}

impl SectionBuilder {
    fn push_line(&mut self, line: &str) {
        self.lines.push(line.trim_end().to_string());
    }

    /// Keep blank lines inside a body, never at its start
    fn push_blank(&mut self) {
        if !self.lines.is_empty() {
            self.lines.push(String::new());
        }
    }

    /// Close the current section under the pending title
    ///
    /// Sections whose body trims to nothing are dropped along with their title.
    fn flush(&mut self) {
        let title = self.pending_title.take();
        let body = self.lines.join("\n");
        self.lines.clear();

        let body = body.trim_end();
        if body.trim().is_empty() {
            return;
        }

        let ordinal = self.sections.len() as u32 + 1;
        self.sections.push(Section {
            title: title.unwrap_or_else(|| Section::placeholder_title(ordinal)),
            body: body.to_string(),
            ordinal,
        });
    }

    fn finish(mut self) -> Vec<Section> {
        self.flush();
        self.sections
    }
}

/// Segment a manuscript into ordered sections
///
/// Deterministic and side-effect free; ordinals start at 1 and are
/// contiguous.
pub fn segment(text: &str) -> Vec<Section> {
    let normalized = normalize(text);
    let lines: Vec<&str> = normalized.split('\n').collect();

    let mut builder = SectionBuilder::default();
    let mut blank_lines = 0usize;
    let mut seen_content = false;
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        index += 1;

        if line.trim().is_empty() {
            blank_lines += 1;
            builder.push_blank();
            continue;
        }

        if is_section_divider(line) {
            builder.flush();
            blank_lines = 0;
            seen_content = true;
            continue;
        }

        if is_header(line, blank_lines, !seen_content) {
            builder.flush();

            let mut title = line.trim().to_string();
            if let Some(subtitle) = lines.get(index).and_then(|next| subtitle_candidate(next)) {
                title = merge_subtitle(&title, subtitle);
                index += 1;
            }

            builder.pending_title = Some(title);
            blank_lines = 0;
            seen_content = true;
            continue;
        }

        builder.push_line(line);
        blank_lines = 0;
        seen_content = true;
    }

    let sections = builder.finish();
    tracing::debug!(sections = sections.len(), "Manuscript segmented");
    sections
}
