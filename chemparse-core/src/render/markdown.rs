use std::fmt::Write;

use crate::entities::{BackendOutcome, BackendReport, Submission};

use super::{Render, Renderer};

/// Combined markdown report, one section per backend.
#[derive(Debug, Default)]
pub struct MarkdownRenderer {
    out: String,
}

impl MarkdownRenderer {
    pub fn finalize(self) -> String {
        self.out
    }
}

impl Renderer for MarkdownRenderer {
    type Ok = ();

    fn render_original(&mut self, submission: &Submission) -> anyhow::Result<Self::Ok> {
        let metadata = submission.metadata();
        writeln!(self.out, "# Parsing comparison: {}\n", submission.doc_name())?;
        writeln!(self.out, "- Submission: `{}`", submission.id())?;
        writeln!(self.out, "- Source: {}", submission.source().display_name())?;
        writeln!(
            self.out,
            "- Created: {}",
            submission.created_at().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            self.out,
            "- Methods: {} of {} succeeded in {} ms\n",
            submission.success_count(),
            submission.reports().len(),
            metadata.comparison_duration.as_millis()
        )?;
        Ok(())
    }

    fn render_report(&mut self, report: &BackendReport) -> anyhow::Result<Self::Ok> {
        writeln!(self.out, "## {}\n", report.name)?;
        let cached = if report.cached { ", cached" } else { "" };
        writeln!(
            self.out,
            "_{}, {} ms{}_\n",
            report.slug,
            report.duration.as_millis(),
            cached
        )?;
        match &report.outcome {
            BackendOutcome::Success(output) => {
                if output.is_partial() {
                    writeln!(self.out, "> **Partial result**")?;
                    for warning in &output.warnings {
                        writeln!(self.out, "> - {warning}")?;
                    }
                    writeln!(self.out)?;
                }
                if output.is_blank() {
                    writeln!(self.out, "_No text extracted_\n")?;
                } else {
                    writeln!(self.out, "{}\n", output.markdown.trim_end())?;
                }
            }
            BackendOutcome::Failure(failure) => {
                let kind = serde_json::to_value(failure.kind)?;
                writeln!(
                    self.out,
                    "> **Error** ({}): {}\n",
                    kind.as_str().unwrap_or_default(),
                    failure.message
                )?;
            }
        }
        Ok(())
    }
}

#[tracing::instrument(skip_all)]
pub fn to_markdown<R: Render>(submission: R) -> anyhow::Result<String> {
    let mut renderer = MarkdownRenderer::default();
    submission.render(&mut renderer)?;
    Ok(renderer.finalize())
}
