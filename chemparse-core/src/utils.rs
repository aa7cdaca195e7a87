use anyhow::Context;
use colored::*;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::{
    entities::{BackendOutcome, Submission},
    render::{render_submission, ReportFormat},
};

pub fn sanitize_doc_name(doc_name: &str) -> String {
    doc_name
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
}

fn recreate_result_dir(result_dir_name: &Path) -> anyhow::Result<PathBuf> {
    if std::fs::create_dir_all(result_dir_name).is_err() || !is_empty_dir(result_dir_name)? {
        std::fs::remove_dir_all(result_dir_name)?;
        std::fs::create_dir_all(result_dir_name)?;
    };
    Ok(result_dir_name.to_owned())
}

fn is_empty_dir(dir: &Path) -> anyhow::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

/// Creates a fresh `<doc>-results` directory, under `output_dir` or the current directory.
pub fn create_result_dir<P: AsRef<Path>>(
    output_dir: Option<P>,
    doc_name: &str,
) -> anyhow::Result<PathBuf> {
    let stem = doc_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(doc_name);
    let result_dir_name = format!("{}-results", sanitize_doc_name(stem));
    let res_dir_path = match output_dir {
        Some(p) => p.as_ref().join(&result_dir_name),
        None => PathBuf::from(format!("./{}", &result_dir_name)),
    };
    recreate_result_dir(&res_dir_path).context("can't create result dir")
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("can't create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Writes `<slug>.md` for every successful backend and `report.<ext>` with the
/// combined comparison.
pub fn save_submission(
    submission: &Submission,
    res_dir_path: &Path,
    format: ReportFormat,
) -> anyhow::Result<()> {
    for report in submission.reports() {
        if let BackendOutcome::Success(output) = &report.outcome {
            let out = res_dir_path.join(format!("{}.md", report.slug));
            write_file(&out, &output.markdown)?;
        }
    }

    let content = render_submission(submission, format)?;
    let report_out = res_dir_path.join(format!("report.{}", format.extension()));
    write_file(&report_out, &content)?;

    println!(
        "{} Results saved in: {}",
        "✓".green().bold(),
        res_dir_path.display().to_string().cyan().underline()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{BackendOutput, BackendReport, PdfDocument},
        error::BackendError,
    };
    use std::time::Duration;

    #[test]
    fn test_sanitize_doc_name() {
        assert_eq!(sanitize_doc_name("Non_Ocr"), "Non_Ocr");
        assert_eq!(sanitize_doc_name("my paper (v2)"), "mypaper-v2-");
        assert_eq!(sanitize_doc_name("α-pinène"), "α-pinène");
    }

    #[test]
    fn test_create_result_dir_is_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = create_result_dir(Some(tmp.path()), "run 1.pdf").unwrap();
        assert_eq!(dir, tmp.path().join("run1-results"));
        std::fs::write(dir.join("stale.md"), "old").unwrap();

        let dir = create_result_dir(Some(tmp.path()), "run 1.pdf").unwrap();
        assert!(is_empty_dir(&dir).unwrap());
    }

    #[test]
    fn test_save_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let submission = Submission::new(
            PdfDocument::uploaded("amine.pdf", b"%PDF-".to_vec()),
            vec![
                BackendReport {
                    name: "Tesseract OCR".into(),
                    slug: "tesseract".into(),
                    outcome: BackendOutcome::Success(BackendOutput::new(
                        "### Page 1\nNH3\n\n".into(),
                        Some(1),
                    )),
                    duration: Duration::from_millis(5),
                    cached: false,
                },
                BackendReport {
                    name: "Mistral OCR".into(),
                    slug: "mistral".into(),
                    outcome: Err(BackendError::NoPages).into(),
                    duration: Duration::from_millis(1),
                    cached: false,
                },
            ],
            Duration::from_millis(6),
        );
        save_submission(&submission, tmp.path(), ReportFormat::Json).unwrap();

        assert_eq!(
            std::fs::read_to_string(tmp.path().join("tesseract.md")).unwrap(),
            "### Page 1\nNH3\n\n"
        );
        assert!(!tmp.path().join("mistral.md").exists());
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(tmp.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report["doc_name"], "amine.pdf");
        assert_eq!(report["reports"][1]["outcome"]["status"], "failure");
    }
}
