use anyhow::Context;

use crate::entities::{BackendReport, Submission};

pub mod html;
pub mod markdown;

/// Output written next to the per-backend markdown files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
    Html,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
        }
    }
}

pub trait Render {
    type Output;
    fn render<R: Renderer>(&self, renderer: &mut R) -> anyhow::Result<Self::Output>;
}

pub trait Renderer {
    type Ok;

    fn render_original(&mut self, submission: &Submission) -> anyhow::Result<Self::Ok>;

    fn render_report(&mut self, report: &BackendReport) -> anyhow::Result<Self::Ok>;
}

impl Render for &Submission {
    type Output = ();

    fn render<R: Renderer>(&self, renderer: &mut R) -> anyhow::Result<()> {
        renderer
            .render_original(self)
            .context("can't render original document")?;
        for report in self.reports() {
            renderer
                .render_report(report)
                .with_context(|| format!("can't render {} report", report.slug))?;
        }
        Ok(())
    }
}

/// Renders a whole submission in the requested format.
pub fn render_submission(submission: &Submission, format: ReportFormat) -> anyhow::Result<String> {
    match format {
        ReportFormat::Markdown => markdown::to_markdown(submission),
        ReportFormat::Json => {
            serde_json::to_string_pretty(submission).context("can't serialize submission")
        }
        ReportFormat::Html => html::to_html(submission, submission.doc_name()),
    }
}
