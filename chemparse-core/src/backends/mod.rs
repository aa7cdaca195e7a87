use std::{ffi::OsStr, process::Output, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    config::HarnessConfig,
    entities::{BackendOutput, PageID, PdfDocument},
    error::BackendError,
    native::PdfiumQueue,
};

pub mod docling;
pub mod mistral;
pub mod pdfium;
pub mod tesseract;

pub use docling::DoclingBackend;
pub use mistral::MistralOcrBackend;
pub use pdfium::PdfiumBackend;
pub use tesseract::TesseractBackend;

/// A parsing method compared by the harness.
///
/// Implementations must be stateless with respect to submissions: every call gets the
/// full document and returns either markdown or the reason it could not produce any.
#[async_trait]
pub trait ParseBackend: Send + Sync {
    /// Display name, e.g. "Tesseract OCR"
    fn name(&self) -> &'static str;

    /// Stable lowercase identifier used in URLs, cache files and JSON
    fn slug(&self) -> &'static str;

    async fn parse(&self, document: &PdfDocument) -> Result<BackendOutput, BackendError>;
}

/// Every backend enabled by `config`, in display order.
///
/// Spawns the pdfium worker, so it must run inside a tokio runtime.
pub fn default_backends(config: &HarnessConfig) -> Vec<Arc<dyn ParseBackend>> {
    let pdfium = PdfiumQueue::new(&config.pdfium);
    let all: Vec<Arc<dyn ParseBackend>> = vec![
        Arc::new(TesseractBackend::new(
            config.tesseract.clone(),
            pdfium.clone(),
        )),
        Arc::new(DoclingBackend::new(config.docling.clone())),
        Arc::new(PdfiumBackend::new(pdfium)),
        Arc::new(MistralOcrBackend::new(config.mistral.clone())),
    ];
    all.into_iter()
        .filter(|b| config.is_enabled(b.slug()))
        .collect()
}

/// Runs an external tool to completion, mapping spawn and exit failures.
pub(crate) async fn run_tool<I, S>(binary: &str, args: I) -> Result<Output, BackendError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(binary)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| BackendError::MissingTool {
            binary: binary.to_owned(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::ProcessFailed {
            binary: binary.to_owned(),
            status: output.status.to_string(),
            stderr: last_lines(&stderr, 5),
        });
    }
    Ok(output)
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<_> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Collects per-page results and applies the partial-result policy.
///
/// - no page at all: failure
/// - every page failed: failure with the first page error
/// - some pages failed: success, one warning per failed page
#[derive(Debug, Default)]
pub(crate) struct PageCollector {
    pages: Vec<(PageID, Result<String, BackendError>)>,
}

impl PageCollector {
    pub(crate) fn push(&mut self, page_id: PageID, result: Result<String, BackendError>) {
        self.pages.push((page_id, result));
    }

    pub(crate) fn finish(
        mut self,
        format_page: impl Fn(PageID, &str) -> String,
        blank_warning: &str,
    ) -> Result<BackendOutput, BackendError> {
        if self.pages.is_empty() {
            return Err(BackendError::NoPages);
        }
        self.pages.sort_by_key(|(page_id, _)| *page_id);

        if self.pages.iter().all(|(_, r)| r.is_err()) {
            let first = self.pages.into_iter().find_map(|(_, r)| r.err());
            return Err(first.unwrap_or(BackendError::NoPages));
        }

        let page_count = self.pages.len();
        let mut markdown = String::new();
        let mut warnings = Vec::new();
        for (page_id, result) in self.pages {
            match result {
                Ok(text) => {
                    if text.trim().is_empty() {
                        warnings.push(format!("page {}: {}", page_id + 1, blank_warning));
                    }
                    markdown.push_str(&format_page(page_id, &text));
                }
                Err(e) => warnings.push(format!("page {}: {}", page_id + 1, e)),
            }
        }
        Ok(BackendOutput {
            markdown,
            pages: Some(page_count),
            warnings,
        })
    }
}
