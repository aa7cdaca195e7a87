use anyhow::Context;
use clap::Parser;
use colored::*;

use chemparse_core::{
    entities::{BackendOutcome, BackendReport},
    render::ReportFormat,
    utils::{create_result_dir, save_submission},
    BackendArgs, ComparisonHarness, ExampleDoc, HarnessConfig, PdfDocument,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Chemparse - compare PDF parsing methods side by side",
    long_about = "Runs every configured parsing method (Tesseract OCR, Docling, pdfium text extraction, Mistral OCR) on one PDF and saves each method's markdown next to a combined report."
)]
struct Args {
    /// Path to the PDF file to compare
    #[arg(required_unless_present = "example", conflicts_with = "example")]
    file_path: Option<PathBuf>,

    #[arg(long, value_enum, help = "Use one of the bundled example documents")]
    example: Option<ExampleDoc>,

    /// Specifies the target directory where results will be saved
    ///
    /// If not specified, defaults to the current working directory.
    #[arg(
        long,
        env = "CHEMPARSE_OUTPUT_DIR",
        help = "Specify the directory to store comparison results"
    )]
    output_dir: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value_t = ReportFormat::Markdown,
        help = "Format of the combined report"
    )]
    format: ReportFormat,

    #[command(flatten)]
    backends: BackendArgs,
}

fn setup_progress_bar(backend_count: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(backend_count as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    Ok(pb)
}

fn status_line(report: &BackendReport) -> String {
    let elapsed = format!("{}ms", report.duration.as_millis());
    let cached = if report.cached { " (cached)" } else { "" };
    match &report.outcome {
        BackendOutcome::Success(output) if output.is_partial() => format!(
            "{} {} {}{} partial result, {} warnings",
            "⚠".yellow().bold(),
            report.name.bold(),
            elapsed.dimmed(),
            cached,
            output.warnings.len()
        ),
        BackendOutcome::Success(_) => format!(
            "{} {} {}{}",
            "✓".green().bold(),
            report.name.bold(),
            elapsed.dimmed(),
            cached
        ),
        BackendOutcome::Failure(failure) => format!(
            "{} {} {} {}",
            "✗".red().bold(),
            report.name.bold(),
            elapsed.dimmed(),
            failure.message.red()
        ),
    }
}

async fn load_document(args: &Args, harness: &ComparisonHarness) -> anyhow::Result<PdfDocument> {
    if let Some(example) = args.example {
        return Ok(harness.load_example(example).await?);
    }
    let path = args
        .file_path
        .as_ref()
        .context("a PDF path or --example is required")?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("can't read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_owned());
    Ok(PdfDocument::uploaded(filename, data))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new("chemparse_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = HarnessConfig::from(args.backends.clone());
    let harness = ComparisonHarness::from_config(&config)?;
    let document = load_document(&args, &harness).await?;

    let pb = setup_progress_bar(harness.backend_count())?;
    pb.set_message(document.name().to_owned());
    let pbc = pb.clone();

    let submission = harness
        .compare_with_callback(
            document,
            Some(move |report: &BackendReport| {
                pbc.println(status_line(report));
                pbc.inc(1u64);
            }),
        )
        .await?;

    pb.finish_with_message(format!(
        "Compared {} methods in {}ms",
        submission.reports().len(),
        submission.metadata().comparison_duration.as_millis()
    ));

    let res_dir_path = create_result_dir(args.output_dir.as_ref(), submission.doc_name())?;
    save_submission(&submission, &res_dir_path, args.format)?;
    Ok(())
}
