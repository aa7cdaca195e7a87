use std::{path::Path, sync::Arc, time::Instant};

use image::DynamicImage;
use pdfium_render::prelude::{PdfPage, PdfPageTextChar, PdfRect, PdfRenderConfig, Pdfium};
use tokio::sync::{
    mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tracing::{instrument, Span};

use crate::{
    config::PdfiumConfig,
    entities::{BBox, CharSpan, Line, NativePage, PageID},
    error::BackendError,
};

const MAX_CONCURRENT_NATIVE_REQS: usize = 10;
const POINTS_PER_INCH: f32 = 72.0;

fn bbox_from_pdfrect(
    PdfRect {
        bottom,
        left,
        top,
        right,
    }: PdfRect,
    page_height: f32,
) -> BBox {
    BBox {
        x0: left.value,
        y0: page_height - top.value,
        x1: right.value,
        y1: page_height - bottom.value,
    }
}

pub(crate) fn parse_text_spans<'a>(
    chars: impl Iterator<Item = PdfPageTextChar<'a>>,
    page_bbox: &BBox,
) -> Vec<CharSpan> {
    let mut spans: Vec<CharSpan> = Vec::new();

    for char in chars {
        let Some(c) = char.unicode_char() else {
            continue;
        };
        // Generated chars (pdfium inserted line breaks) have no usable bounds
        let bbox = if c.is_control() {
            None
        } else {
            char.tight_bounds()
                .map(|rect| bbox_from_pdfrect(rect, page_bbox.height()))
                .ok()
        };
        let font_name = char.font_name();
        let font_size = char.unscaled_font_size().value;
        let rotation = char.get_rotation_clockwise_degrees();

        match spans.last_mut() {
            Some(span)
                if !span.text.ends_with('\n') && span.accepts(&font_name, font_size, rotation) =>
            {
                let bbox = bbox.unwrap_or_else(|| span.bbox.clone());
                span.push(c, &bbox);
            }
            Some(span) if bbox.is_none() => {
                let bbox = span.bbox.clone();
                span.push(c, &bbox);
            }
            _ => {
                let Some(bbox) = bbox else {
                    continue;
                };
                spans.push(CharSpan {
                    bbox,
                    text: c.into(),
                    rotation,
                    font_name,
                    font_size,
                });
            }
        }
    }

    spans
}

pub(crate) fn parse_text_lines(spans: Vec<CharSpan>) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    for span in spans {
        match lines.last_mut() {
            None => lines.push(Line::new_from_span(span)),
            Some(line) => {
                if let Err(span) = line.append(span) {
                    lines.push(Line::new_from_span(span))
                }
            }
        }
    }
    for line in lines.iter_mut() {
        line.finalize();
    }
    lines.retain(|l| !l.text.trim().is_empty());
    lines
}

/// Outcome of one page of a text extraction request.
#[derive(Debug)]
pub enum NativeEvent<T> {
    Page(T),
    PageFailed { page_id: PageID, error: BackendError },
    /// The document could not be opened at all. Always the last event.
    DocumentFailed(BackendError),
}

#[derive(Debug)]
pub struct RasterPage {
    pub page_id: PageID,
    pub image: DynamicImage,
}

enum NativeRequest {
    PageCount {
        doc_data: Arc<[u8]>,
        reply_tx: oneshot::Sender<Result<usize, BackendError>>,
    },
    RasterizePage {
        doc_data: Arc<[u8]>,
        page_id: PageID,
        dpi: u32,
        reply_tx: oneshot::Sender<Result<RasterPage, BackendError>>,
    },
    TextLines {
        doc_data: Arc<[u8]>,
        pages_tx: UnboundedSender<NativeEvent<NativePage>>,
    },
}

impl NativeRequest {
    fn fail(self, error: BackendError) {
        match self {
            NativeRequest::PageCount { reply_tx, .. } => {
                let _ = reply_tx.send(Err(error));
            }
            NativeRequest::RasterizePage { reply_tx, .. } => {
                let _ = reply_tx.send(Err(error));
            }
            NativeRequest::TextLines { pages_tx, .. } => {
                let _ = pages_tx.send(NativeEvent::DocumentFailed(error));
            }
        }
    }
}

/// Serialises every pdfium call onto one blocking worker thread.
///
/// pdfium is not re-entrant, so backends push requests here and receive pages back
/// over per-request channels. The worker never waits on a consumer: rasterisation is
/// one request per page and text pages go to an unbounded channel.
#[derive(Debug, Clone)]
pub struct PdfiumQueue {
    queue: Sender<(NativeRequest, Span)>,
}

impl std::fmt::Debug for NativeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeRequest::PageCount { .. } => f.write_str("PageCount"),
            NativeRequest::RasterizePage { page_id, dpi, .. } => {
                write!(f, "RasterizePage({page_id}, {dpi}dpi)")
            }
            NativeRequest::TextLines { .. } => f.write_str("TextLines"),
        }
    }
}

impl PdfiumQueue {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &PdfiumConfig) -> Self {
        let (queue_sender, queue_receiver) = mpsc::channel(MAX_CONCURRENT_NATIVE_REQS);
        let library_path = config.library_path.clone();
        tokio::task::spawn_blocking(move || {
            start_native_worker(library_path.as_deref(), queue_receiver)
        });
        Self {
            queue: queue_sender,
        }
    }

    async fn push(&self, req: NativeRequest) -> Result<(), BackendError> {
        let span = Span::current();
        self.queue
            .send((req, span))
            .await
            .map_err(|_| BackendError::Pdfium("pdfium worker has stopped".to_owned()))
    }

    pub async fn page_count(&self, doc_data: Arc<[u8]>) -> Result<usize, BackendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.push(NativeRequest::PageCount { doc_data, reply_tx })
            .await?;
        reply_rx
            .await
            .map_err(|_| BackendError::Pdfium("pdfium worker dropped the request".to_owned()))?
    }

    /// Renders a single page at `dpi`.
    pub async fn rasterize_page(
        &self,
        doc_data: Arc<[u8]>,
        page_id: PageID,
        dpi: u32,
    ) -> Result<RasterPage, BackendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.push(NativeRequest::RasterizePage {
            doc_data,
            page_id,
            dpi,
            reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| BackendError::Pdfium("pdfium worker dropped the request".to_owned()))?
    }

    /// Streams the text lines of every page.
    pub async fn text_lines(
        &self,
        doc_data: Arc<[u8]>,
    ) -> Result<UnboundedReceiver<NativeEvent<NativePage>>, BackendError> {
        let (pages_tx, pages_rx) = mpsc::unbounded_channel();
        self.push(NativeRequest::TextLines { doc_data, pages_tx })
            .await?;
        Ok(pages_rx)
    }
}

fn pdfium_err(err: impl std::fmt::Display) -> BackendError {
    BackendError::Pdfium(err.to_string())
}

fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path.to_string_lossy().to_string()),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("can't load pdfium library: {e}"))?;
    Ok(Pdfium::new(bindings))
}

#[instrument(skip(page))]
fn render_page(page: &PdfPage, page_id: PageID, dpi: u32) -> Result<RasterPage, BackendError> {
    let start_time = Instant::now();
    let scale = dpi as f32 / POINTS_PER_INCH;
    let image = page
        .render_with_config(&PdfRenderConfig::default().scale_page_by_factor(scale))
        .map(|bitmap| bitmap.as_image())
        .map_err(pdfium_err)?;
    tracing::debug!(
        "Rendering page {} at {}dpi took {}ms",
        page_id,
        dpi,
        start_time.elapsed().as_millis()
    );
    Ok(RasterPage { page_id, image })
}

#[instrument(skip(page))]
fn extract_page_lines(page: &PdfPage, page_id: PageID) -> Result<NativePage, BackendError> {
    let start_time = Instant::now();
    let page_bbox = BBox {
        x0: 0f32,
        y0: 0f32,
        x1: page.width().value,
        y1: page.height().value,
    };
    let text = page.text().map_err(pdfium_err)?;
    let text_spans = parse_text_spans(text.chars().iter(), &page_bbox);
    let lines = parse_text_lines(text_spans);
    tracing::debug!(
        "Extracting {} lines of page {} using pdfium took {}ms",
        lines.len(),
        page_id,
        start_time.elapsed().as_millis()
    );
    Ok(NativePage {
        page_id,
        width: page_bbox.width(),
        height: page_bbox.height(),
        lines,
    })
}

fn stream_text_lines(
    pdfium: &Pdfium,
    doc_data: &[u8],
    pages_tx: &UnboundedSender<NativeEvent<NativePage>>,
) {
    let document = match pdfium.load_pdf_from_byte_slice(doc_data, None) {
        Ok(document) => document,
        Err(e) => {
            let _ = pages_tx.send(NativeEvent::DocumentFailed(pdfium_err(e)));
            return;
        }
    };
    for (page_id, page) in document.pages().iter().enumerate() {
        let event = match extract_page_lines(&page, page_id) {
            Ok(parsed) => NativeEvent::Page(parsed),
            Err(error) => NativeEvent::PageFailed { page_id, error },
        };
        // Receiver gone: the backend timed out or bailed
        if pages_tx.send(event).is_err() {
            break;
        }
    }
}

fn rasterize_one(
    pdfium: &Pdfium,
    doc_data: &[u8],
    page_id: PageID,
    dpi: u32,
) -> Result<RasterPage, BackendError> {
    let document = pdfium
        .load_pdf_from_byte_slice(doc_data, None)
        .map_err(pdfium_err)?;
    let index = u16::try_from(page_id)
        .map_err(|_| BackendError::Pdfium(format!("page {page_id} is out of range")))?;
    let page = document.pages().get(index).map_err(pdfium_err)?;
    render_page(&page, page_id, dpi)
}

fn handle_native_req(pdfium: &Pdfium, req: NativeRequest) {
    match req {
        NativeRequest::PageCount {
            doc_data,
            reply_tx,
        } => {
            let count = pdfium
                .load_pdf_from_byte_slice(&doc_data, None)
                .map(|document| document.pages().len() as usize)
                .map_err(pdfium_err);
            let _ = reply_tx.send(count);
        }
        NativeRequest::RasterizePage {
            doc_data,
            page_id,
            dpi,
            reply_tx,
        } => {
            // Caller gone: the backend timed out or bailed
            if reply_tx.is_closed() {
                return;
            }
            let _ = reply_tx.send(rasterize_one(pdfium, &doc_data, page_id, dpi));
        }
        NativeRequest::TextLines { doc_data, pages_tx } => {
            stream_text_lines(pdfium, &doc_data, &pages_tx)
        }
    }
}

fn start_native_worker(library_path: Option<&Path>, mut input_rx: Receiver<(NativeRequest, Span)>) {
    let pdfium = bind_pdfium(library_path);
    if let Err(e) = &pdfium {
        tracing::warn!("{e}, pdfium based backends will fail");
    }
    while let Some((req, parent_span)) = input_rx.blocking_recv() {
        // Reenter span
        let _guard = parent_span.enter();
        tracing::debug!("handling native request {req:?}");
        match &pdfium {
            Ok(pdfium) => handle_native_req(pdfium, req),
            Err(e) => req.fail(BackendError::Pdfium(e.clone())),
        }
    }
}
