use std::{ffi::OsStr, path::Path, time::Instant};

use async_trait::async_trait;

use super::{run_tool, PageCollector, ParseBackend};
use crate::{
    config::TesseractConfig,
    entities::{BackendOutput, PageID, PdfDocument},
    error::BackendError,
    native::{PdfiumQueue, RasterPage},
};

/// OCR every page: rasterise with pdfium, then run the tesseract CLI on each image.
pub struct TesseractBackend {
    config: TesseractConfig,
    pdfium: PdfiumQueue,
}

impl TesseractBackend {
    pub fn new(config: TesseractConfig, pdfium: PdfiumQueue) -> Self {
        Self { config, pdfium }
    }

    async fn ocr_page(&self, work_dir: &Path, page: RasterPage) -> Result<String, BackendError> {
        let RasterPage { page_id, image } = page;
        let image_path = work_dir.join(format!("page-{:04}.png", page_id + 1));

        let save_path = image_path.clone();
        tokio::task::spawn_blocking(move || image.save(save_path))
            .await
            .map_err(|e| BackendError::Panicked(e.to_string()))??;

        let start = Instant::now();
        let psm = self.config.psm.to_string();
        let output = run_tool(
            &self.config.binary,
            [
                image_path.as_os_str(),
                OsStr::new("stdout"),
                OsStr::new("-l"),
                OsStr::new(&self.config.lang),
                OsStr::new("--psm"),
                OsStr::new(&psm),
            ],
        )
        .await?;
        tracing::debug!(
            "tesseract on page {} took {}ms",
            page_id,
            start.elapsed().as_millis()
        );
        // Page image is no longer needed
        let _ = tokio::fs::remove_file(&image_path).await;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub(crate) fn format_ocr_page(page_id: PageID, text: &str) -> String {
    format!("### Page {}\n{}\n\n", page_id + 1, text)
}

#[async_trait]
impl ParseBackend for TesseractBackend {
    fn name(&self) -> &'static str {
        "Tesseract OCR"
    }

    fn slug(&self) -> &'static str {
        "tesseract"
    }

    #[tracing::instrument(skip_all, fields(doc = document.name()))]
    async fn parse(&self, document: &PdfDocument) -> Result<BackendOutput, BackendError> {
        let page_count = self.pdfium.page_count(document.shared_bytes()).await?;
        if page_count == 0 {
            return Err(BackendError::NoPages);
        }
        tracing::debug!("OCR of {page_count} pages at {}dpi", self.config.dpi);

        let work_dir = tempfile::tempdir()?;
        let mut collector = PageCollector::default();
        for page_id in 0..page_count {
            // pdfium is only held while this page renders
            let text = match self
                .pdfium
                .rasterize_page(document.shared_bytes(), page_id, self.config.dpi)
                .await
            {
                Ok(page) => self.ocr_page(work_dir.path(), page).await,
                Err(e) => Err(e),
            };
            // A missing binary fails every page the same way
            if let Err(e @ BackendError::MissingTool { .. }) = text {
                return Err(e);
            }
            collector.push(page_id, text);
        }
        collector.finish(format_ocr_page, "OCR produced no text")
    }
}
