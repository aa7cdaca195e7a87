use chrono::{DateTime, Utc};
use plsfix::fix_text;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use uuid::Uuid;

use crate::error::{BackendError, FailureKind};

pub type PageID = usize;

const CHEMPARSE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }
    #[inline(always)]
    pub(crate) fn merge(&mut self, other: &Self) {
        self.x0 = self.x0.min(other.x0);
        self.y0 = self.y0.min(other.y0);
        self.x1 = self.x1.max(other.x1);
        self.y1 = self.y1.max(other.y1);
    }
}

/// Run of consecutive characters sharing font and rotation.
#[derive(Debug, Clone)]
pub struct CharSpan {
    pub bbox: BBox,
    pub text: String,
    pub rotation: f32,
    pub font_name: String,
    pub font_size: f32,
}

impl CharSpan {
    pub(crate) fn accepts(&self, font_name: &str, font_size: f32, rotation: f32) -> bool {
        self.font_size == font_size && self.font_name == font_name && self.rotation == rotation
    }

    pub(crate) fn push(&mut self, c: char, bbox: &BBox) {
        self.text.push(c);
        self.bbox.merge(bbox);
    }
}

#[derive(Debug, Default, Clone)]
pub struct Line {
    pub text: String,
    pub bbox: BBox,
    pub rotation: f32,
    pub spans: Vec<CharSpan>,
}

impl Line {
    pub fn new_from_span(span: CharSpan) -> Self {
        Self {
            bbox: span.bbox.clone(),
            text: span.text.clone(),
            rotation: span.rotation,
            spans: vec![span],
        }
    }

    /// Hands the span back when it starts a new line.
    pub fn append(&mut self, span: CharSpan) -> Result<(), CharSpan> {
        if span.rotation != self.rotation
        // NOTE: pdfium doesn't always inject a linebreak, so we check the span positions
        || span.bbox.y0 > self.bbox.y1
        || self.text.ends_with('\n') || self.text.ends_with('\x02')
        {
            Err(span)
        } else {
            self.bbox.merge(&span.bbox);
            self.text.push_str(&span.text);
            self.spans.push(span);
            Ok(())
        }
    }

    pub(crate) fn finalize(&mut self) {
        let trimmed = self.text.trim_end_matches(&['\r', '\n', '\x02'][..]);
        self.text = fix_text(trimmed, None);
    }

    /// Size of the font covering most of the line's characters.
    pub fn dominant_font_size(&self) -> f32 {
        self.spans
            .iter()
            .max_by_key(|s| s.text.trim().chars().count())
            .map(|s| s.font_size)
            .unwrap_or_default()
    }
}

/// Text lines of a single page, as extracted from the PDF text layer.
#[derive(Debug, Clone, Default)]
pub struct NativePage {
    pub page_id: PageID,
    pub width: f32,
    pub height: f32,
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExampleDoc {
    Ocr,
    NonOcr,
}

impl ExampleDoc {
    pub const ALL: [ExampleDoc; 2] = [ExampleDoc::Ocr, ExampleDoc::NonOcr];

    pub fn label(&self) -> &'static str {
        match self {
            ExampleDoc::Ocr => "Example OCR PDF",
            ExampleDoc::NonOcr => "Example Non-OCR PDF",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExampleDoc::Ocr => "Ocr.pdf",
            ExampleDoc::NonOcr => "Non_Ocr.pdf",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ExampleDoc::Ocr => "ocr",
            ExampleDoc::NonOcr => "non-ocr",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.slug() == slug)
    }

    pub fn path(&self, examples_dir: &Path) -> PathBuf {
        examples_dir.join(self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    Uploaded { filename: String },
    Example { example: ExampleDoc },
}

impl DocumentSource {
    pub fn display_name(&self) -> &str {
        match self {
            DocumentSource::Uploaded { filename } => filename,
            DocumentSource::Example { example } => example.label(),
        }
    }

    pub fn example(&self) -> Option<ExampleDoc> {
        match self {
            DocumentSource::Example { example } => Some(*example),
            DocumentSource::Uploaded { .. } => None,
        }
    }
}

/// Immutable PDF bytes shared by every backend of a submission.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub source: DocumentSource,
    data: Arc<[u8]>,
}

impl PdfDocument {
    pub fn new(source: DocumentSource, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            source,
            data: data.into(),
        }
    }

    pub fn uploaded(filename: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(
            DocumentSource::Uploaded {
                filename: filename.into(),
            },
            data,
        )
    }

    pub fn example(example: ExampleDoc, data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(DocumentSource::Example { example }, data)
    }

    pub fn name(&self) -> &str {
        match &self.source {
            DocumentSource::Uploaded { filename } => filename,
            DocumentSource::Example { example } => example.file_name(),
        }
    }

    /// File name without extension
    pub fn stem(&self) -> &str {
        let name = self.name();
        name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BackendOutput {
    pub markdown: String,
    /// Number of pages the backend reported on, when it knows.
    pub pages: Option<usize>,
    /// Non fatal problems, one per affected page. A non empty list marks a partial result.
    pub warnings: Vec<String>,
}

impl BackendOutput {
    pub fn new(markdown: String, pages: Option<usize>) -> Self {
        Self {
            markdown,
            pages,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.markdown.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&BackendError> for BackendFailure {
    fn from(err: &BackendError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendOutcome {
    Success(BackendOutput),
    Failure(BackendFailure),
}

impl BackendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BackendOutcome::Success(_))
    }

    pub fn output(&self) -> Option<&BackendOutput> {
        match self {
            BackendOutcome::Success(output) => Some(output),
            BackendOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&BackendFailure> {
        match self {
            BackendOutcome::Success(_) => None,
            BackendOutcome::Failure(failure) => Some(failure),
        }
    }
}

impl From<Result<BackendOutput, BackendError>> for BackendOutcome {
    fn from(result: Result<BackendOutput, BackendError>) -> Self {
        match result {
            Ok(output) => BackendOutcome::Success(output),
            Err(err) => BackendOutcome::Failure(BackendFailure::from(&err)),
        }
    }
}

/// Result slot of one backend for one submission.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendReport {
    pub name: String,
    pub slug: String,
    pub outcome: BackendOutcome,
    #[serde(with = "serde_millis")]
    pub duration: Duration,
    pub cached: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmissionMetadata {
    #[serde(with = "serde_millis")]
    pub comparison_duration: Duration,
    pub chemparse_version: String,
}

impl SubmissionMetadata {
    pub fn new(comparison_duration: Duration) -> Self {
        Self {
            comparison_duration,
            chemparse_version: CHEMPARSE_VERSION.to_owned(),
        }
    }
}

/// One selected PDF together with the per-backend results collected for it.
///
/// Built once by the harness and never mutated afterwards.
#[derive(Debug, Serialize)]
pub struct Submission {
    id: Uuid,
    source: DocumentSource,
    doc_name: String,
    size_bytes: usize,
    created_at: DateTime<Utc>,
    reports: Vec<BackendReport>,
    metadata: SubmissionMetadata,
    #[serde(skip)]
    document: PdfDocument,
}

impl Submission {
    pub(crate) fn new(
        document: PdfDocument,
        reports: Vec<BackendReport>,
        comparison_duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: document.source.clone(),
            doc_name: document.name().to_owned(),
            size_bytes: document.len(),
            created_at: Utc::now(),
            reports,
            metadata: SubmissionMetadata::new(comparison_duration),
            document,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn document(&self) -> &PdfDocument {
        &self.document
    }

    /// Reports in backend registration order.
    pub fn reports(&self) -> &[BackendReport] {
        &self.reports
    }

    pub fn report(&self, slug: &str) -> Option<&BackendReport> {
        self.reports.iter().find(|r| r.slug == slug)
    }

    pub fn metadata(&self) -> &SubmissionMetadata {
        &self.metadata
    }

    pub fn success_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }
}
