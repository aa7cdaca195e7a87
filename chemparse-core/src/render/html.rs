use base64::{engine::general_purpose::STANDARD, Engine as _};
use build_html::{escape_html, Container, ContainerType, Html, HtmlContainer, HtmlPage};

use crate::entities::{BackendOutcome, BackendReport, ExampleDoc, Submission};

use super::{Render, Renderer};

pub const PAGE_TITLE: &str = "Chemical Document Parsing Comparison";
pub const EMPTY_PROMPT: &str = "Please upload a PDF or select an example";
const ORIGINAL_ANCHOR: &str = "original";
const ORIGINAL_LABEL: &str = "Original Document";
const PDF_IFRAME_HEIGHT: u32 = 1000;

static STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0 1.5rem; color: #1d1d1f; }
.controls { display: flex; gap: 1rem; align-items: center; flex-wrap: wrap; }
.controls form { margin: 0; }
.banner { padding: .75rem 1rem; border-radius: 4px; margin: 1rem 0; }
.error { background: #fdecea; color: #8a1c12; }
.warning { background: #fff4e5; color: #7a4b00; padding: .5rem 1rem; border-radius: 4px; }
.methods { display: flex; gap: 1rem; margin: 1rem 0; }
.panes { display: grid; grid-template-columns: repeat(auto-fit, minmax(28rem, 1fr)); gap: 1rem; }
.pane { border: 1px solid #d2d2d7; border-radius: 6px; padding: 0 1rem 1rem; overflow: auto; }
.pane pre { white-space: pre-wrap; word-break: break-word; font-size: .85rem; }
.meta { color: #6e6e73; font-size: .85rem; }
.prompt { font-size: 1.1rem; margin-top: 2rem; }
"#;

/// Builds the side by side comparison: the original PDF followed by one pane per backend.
pub struct HTMLRenderer {
    nav: Container,
    panes: Container,
}

impl Default for HTMLRenderer {
    fn default() -> Self {
        Self {
            nav: Container::new(ContainerType::Nav).with_attributes([("class", "methods")]),
            panes: Container::new(ContainerType::Div).with_attributes([("class", "panes")]),
        }
    }
}

impl HTMLRenderer {
    fn push_anchor(&mut self, id: &str, label: &str) {
        self.nav
            .add_link(format!("#{}", escape_html(id)), escape_html(label));
    }

    pub fn finish(self) -> Container {
        Container::new(ContainerType::Main)
            .with_container(self.nav)
            .with_container(self.panes)
    }

    pub fn finalize(self, page_title: &str) -> String {
        HtmlPage::new()
            .with_title(escape_html(page_title))
            .with_style(STYLE)
            .with_header(1, escape_html(page_title))
            .with_container(self.finish())
            .to_html_string()
    }
}

fn report_meta(report: &BackendReport) -> String {
    let mut meta = format!("{} ms", report.duration.as_millis());
    if let Some(pages) = report.outcome.output().and_then(|o| o.pages) {
        meta.push_str(&format!(", {pages} pages"));
    }
    if report.cached {
        meta.push_str(", cached");
    }
    meta
}

fn pdf_iframe(data: &[u8]) -> String {
    format!(
        r#"<iframe src="data:application/pdf;base64,{}" width="100%" height="{}" type="application/pdf"></iframe>"#,
        STANDARD.encode(data),
        PDF_IFRAME_HEIGHT
    )
}

impl Renderer for HTMLRenderer {
    type Ok = ();

    fn render_original(&mut self, submission: &Submission) -> anyhow::Result<Self::Ok> {
        self.push_anchor(ORIGINAL_ANCHOR, ORIGINAL_LABEL);
        let document = submission.document();
        let pane = Container::new(ContainerType::Div)
            .with_attributes([("class", "pane original"), ("id", ORIGINAL_ANCHOR)])
            .with_header(2, ORIGINAL_LABEL)
            .with_paragraph_attr(
                escape_html(&format!("{} ({} bytes)", document.name(), document.len())),
                [("class", "meta")],
            )
            .with_raw(pdf_iframe(document.bytes()));
        self.panes.add_container(pane);
        Ok(())
    }

    fn render_report(&mut self, report: &BackendReport) -> anyhow::Result<Self::Ok> {
        self.push_anchor(&report.slug, &report.name);
        let mut pane = Container::new(ContainerType::Div)
            .with_attributes([("class", "pane"), ("id", report.slug.as_str())])
            .with_header(2, escape_html(&report.name))
            .with_paragraph_attr(escape_html(&report_meta(report)), [("class", "meta")]);

        match &report.outcome {
            BackendOutcome::Success(output) => {
                if output.is_partial() {
                    let mut warnings = Container::new(ContainerType::UnorderedList);
                    for warning in &output.warnings {
                        warnings.add_raw(escape_html(warning));
                    }
                    pane.add_container(
                        Container::new(ContainerType::Div)
                            .with_attributes([("class", "warning")])
                            .with_paragraph("Partial result")
                            .with_container(warnings),
                    );
                }
                if output.is_blank() {
                    pane.add_paragraph_attr("No text extracted", [("class", "meta")]);
                } else {
                    pane.add_preformatted(escape_html(&output.markdown));
                }
            }
            BackendOutcome::Failure(failure) => {
                pane.add_paragraph_attr(
                    escape_html(&format!("Error: {}", failure.message)),
                    [("class", "banner error")],
                );
            }
        }
        self.panes.add_container(pane);
        Ok(())
    }
}

pub fn to_html<R: Render>(submission: R, page_title: &str) -> anyhow::Result<String> {
    let mut html_renderer = HTMLRenderer::default();
    submission.render(&mut html_renderer)?;
    Ok(html_renderer.finalize(page_title))
}

fn controls() -> Container {
    let mut controls = Container::new(ContainerType::Div)
        .with_attributes([("class", "controls")])
        .with_raw(
            r#"<form method="post" action="/upload" enctype="multipart/form-data"><input type="file" name="file" accept="application/pdf,.pdf" required> <button type="submit">Upload PDF</button></form>"#,
        );
    for example in ExampleDoc::ALL {
        controls.add_raw(format!(
            r#"<form method="post" action="/examples/{}"><button type="submit">{}</button></form>"#,
            example.slug(),
            escape_html(example.label())
        ));
    }
    controls
}

/// The web UI page: upload controls, an optional one-time error banner, then either the
/// comparison of the active submission or a prompt.
pub fn render_page(submission: Option<&Submission>, error: Option<&str>) -> anyhow::Result<String> {
    let mut page = HtmlPage::new()
        .with_title(PAGE_TITLE)
        .with_style(STYLE)
        .with_header(1, PAGE_TITLE)
        .with_container(controls());

    if let Some(error) = error {
        page.add_container(
            Container::new(ContainerType::Div)
                .with_attributes([("class", "banner error"), ("role", "alert")])
                .with_paragraph(escape_html(error)),
        );
    }

    match submission {
        Some(submission) => {
            let mut renderer = HTMLRenderer::default();
            submission.render(&mut renderer)?;
            page.add_paragraph_attr(
                escape_html(&format!(
                    "Showing {}: {} of {} methods succeeded",
                    submission.source().display_name(),
                    submission.success_count(),
                    submission.reports().len()
                )),
                [("class", "meta")],
            );
            page.add_container(renderer.finish());
        }
        None => page.add_paragraph_attr(EMPTY_PROMPT, [("class", "prompt")]),
    }
    Ok(page.to_html_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{BackendOutput, PdfDocument},
        error::BackendError,
    };
    use std::time::Duration;

    fn report(slug: &str, outcome: BackendOutcome) -> BackendReport {
        BackendReport {
            name: format!("{slug} method"),
            slug: slug.to_owned(),
            outcome,
            duration: Duration::from_millis(42),
            cached: false,
        }
    }

    fn submission() -> Submission {
        let partial = BackendOutput::new("### Page 1\nNaCl\n\n".into(), Some(2))
            .with_warning("page 2: tesseract exited with 1");
        Submission::new(
            PdfDocument::uploaded("salt.pdf", b"%PDF-1.4 %%EOF".to_vec()),
            vec![
                report(
                    "good",
                    BackendOutcome::Success(BackendOutput::new("<b>H2O</b> & co".into(), Some(1))),
                ),
                report("partial", BackendOutcome::Success(partial)),
                report(
                    "broken",
                    Err(BackendError::MissingCredential {
                        service: "Mistral",
                        variable: "MISTRAL_API_KEY",
                    })
                    .into(),
                ),
            ],
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_panes_and_anchors() {
        let submission = submission();
        let html = to_html(&submission, "salt.pdf").unwrap();
        for anchor in ["#original", "#good", "#partial", "#broken"] {
            assert!(html.contains(&format!("href=\"{anchor}\"")), "{anchor}");
        }
        assert!(html.contains("Original Document"));
        assert!(html.contains("data:application/pdf;base64,JVBERi0xLjQgJSVFT0Y="));
    }

    #[test]
    fn test_backend_text_is_escaped() {
        let html = to_html(&submission(), "salt.pdf").unwrap();
        assert!(html.contains("&lt;b&gt;H2O&lt;/b&gt; &amp; co"));
        assert!(!html.contains("<b>H2O</b>"));
    }

    #[test]
    fn test_partial_and_error_panes() {
        let html = to_html(&submission(), "salt.pdf").unwrap();
        assert!(html.contains("Partial result"));
        assert!(html.contains("page 2: tesseract exited with 1"));
        assert!(html.contains("Error: Mistral API key is not set (MISTRAL_API_KEY)"));
    }

    #[test]
    fn test_page_without_submission_prompts() {
        let html = render_page(None, None).unwrap();
        assert!(html.contains(EMPTY_PROMPT));
        assert!(html.contains("action=\"/upload\""));
        assert!(html.contains("action=\"/examples/non-ocr\""));
        assert!(!html.contains("role=\"alert\""));
    }

    #[test]
    fn test_page_with_error_banner() {
        let html = render_page(None, Some("`x.txt` is not a PDF document")).unwrap();
        assert!(html.contains("role=\"alert\""));
        assert!(html.contains("is not a PDF document"));
    }

    #[test]
    fn test_page_with_submission() {
        let submission = submission();
        let html = render_page(Some(&submission), None).unwrap();
        assert!(!html.contains(EMPTY_PROMPT));
        assert!(html.contains("2 of 3 methods succeeded"));
    }
}
