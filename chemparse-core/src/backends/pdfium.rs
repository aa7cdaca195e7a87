use async_trait::async_trait;
use itertools::Itertools;

use super::{PageCollector, ParseBackend};
use crate::{
    entities::{BackendOutput, Line, NativePage, PageID, PdfDocument},
    error::BackendError,
    native::{NativeEvent, PdfiumQueue},
};

/// Heading levels by font size relative to the body font size
const HEADING_RATIOS: [(f32, &str); 3] = [(1.6, "#"), (1.3, "##"), (1.12, "###")];
/// Longer lines are body text whatever their size
const MAX_HEADING_CHARS: usize = 120;
/// Vertical gap, in line heights, opening a new paragraph
const PARAGRAPH_GAP: f32 = 0.8;
const PAGE_SEPARATOR: &str = "\n-----\n\n";

/// Markdown from the PDF text layer, no OCR.
///
/// Lines come from pdfium's character stream; font size relative to the body text
/// decides headings, vertical gaps decide paragraphs.
pub struct PdfiumBackend {
    pdfium: PdfiumQueue,
}

impl PdfiumBackend {
    pub fn new(pdfium: PdfiumQueue) -> Self {
        Self { pdfium }
    }
}

/// Font size carrying the most characters across the document.
pub(crate) fn body_font_size(pages: &[NativePage]) -> f32 {
    pages
        .iter()
        .flat_map(|p| p.lines.iter())
        .flat_map(|l| l.spans.iter())
        .map(|s| ((s.font_size * 2.0).round() as i64, s.text.trim().chars().count()))
        .into_grouping_map()
        .sum()
        .into_iter()
        .max_by_key(|(size, count)| (*count, -size))
        .map(|(size, _)| size as f32 / 2.0)
        .unwrap_or_default()
}

fn heading_marker(line: &Line, body_size: f32) -> Option<&'static str> {
    if body_size <= 0.0 || line.text.chars().count() > MAX_HEADING_CHARS {
        return None;
    }
    let ratio = line.dominant_font_size() / body_size;
    HEADING_RATIOS
        .iter()
        .find(|(min_ratio, _)| ratio >= *min_ratio)
        .map(|(_, marker)| *marker)
}

pub(crate) fn page_to_markdown(page: &NativePage, body_size: f32) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut prev_line: Option<&Line> = None;

    for line in &page.lines {
        let text = line.text.trim();
        if let Some(marker) = heading_marker(line, body_size) {
            if !paragraph.is_empty() {
                blocks.push(paragraph.join(" "));
                paragraph.clear();
            }
            blocks.push(format!("{marker} {text}"));
            prev_line = None;
            continue;
        }

        let gap_break = prev_line.is_some_and(|prev| {
            let line_height = prev.bbox.height().max(1.0);
            line.bbox.y0 - prev.bbox.y1 > line_height * PARAGRAPH_GAP
        });
        if gap_break && !paragraph.is_empty() {
            blocks.push(paragraph.join(" "));
            paragraph.clear();
        }
        paragraph.push(text);
        prev_line = Some(line);
    }
    if !paragraph.is_empty() {
        blocks.push(paragraph.join(" "));
    }
    blocks.join("\n\n")
}

#[async_trait]
impl ParseBackend for PdfiumBackend {
    fn name(&self) -> &'static str {
        "Pdfium Conversion"
    }

    fn slug(&self) -> &'static str {
        "pdfium"
    }

    #[tracing::instrument(skip_all, fields(doc = document.name()))]
    async fn parse(&self, document: &PdfDocument) -> Result<BackendOutput, BackendError> {
        let mut pages_rx = self.pdfium.text_lines(document.shared_bytes()).await?;

        let mut pages = Vec::new();
        let mut failed: Vec<(PageID, BackendError)> = Vec::new();
        while let Some(event) = pages_rx.recv().await {
            match event {
                NativeEvent::Page(page) => pages.push(page),
                NativeEvent::PageFailed { page_id, error } => failed.push((page_id, error)),
                NativeEvent::DocumentFailed(error) => return Err(error),
            }
        }

        let body_size = body_font_size(&pages);
        tracing::debug!("body font size {body_size}");
        let has_text = pages.iter().any(|p| !p.lines.is_empty());
        let page_total = pages.len() + failed.len();
        let mut collector = PageCollector::default();
        for page in &pages {
            collector.push(page.page_id, Ok(page_to_markdown(page, body_size)));
        }
        for (page_id, error) in failed {
            collector.push(page_id, Err(error));
        }

        let mut output = collector.finish(
            |page_id, text| {
                if page_id + 1 < page_total {
                    format!("{text}{PAGE_SEPARATOR}")
                } else {
                    text.to_owned()
                }
            },
            "no text layer, the page probably needs OCR",
        )?;
        if !has_text {
            output = output.with_warning("document has no text layer, it probably needs OCR");
        }
        Ok(output)
    }
}
