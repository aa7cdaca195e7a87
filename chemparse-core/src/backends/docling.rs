use std::{ffi::OsStr, path::Path};

use async_trait::async_trait;

use super::{run_tool, ParseBackend};
use crate::{
    config::DoclingConfig,
    entities::{BackendOutput, PdfDocument},
    error::BackendError,
    utils::sanitize_doc_name,
};

/// Converts the document with the docling CLI: `docling <pdf> --to md --output <dir>`.
pub struct DoclingBackend {
    config: DoclingConfig,
}

impl DoclingBackend {
    pub fn new(config: DoclingConfig) -> Self {
        Self { config }
    }
}

fn input_stem(document: &PdfDocument) -> String {
    let stem = sanitize_doc_name(document.stem());
    if stem.is_empty() {
        "document".to_owned()
    } else {
        stem
    }
}

async fn read_markdown(output_dir: &Path, stem: &str) -> Result<String, BackendError> {
    let expected = output_dir.join(format!("{stem}.md"));
    match tokio::fs::read_to_string(&expected).await {
        Ok(markdown) => Ok(markdown),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BackendError::InvalidResponse(format!(
                "docling wrote no {}",
                expected.display()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ParseBackend for DoclingBackend {
    fn name(&self) -> &'static str {
        "Docling Conversion"
    }

    fn slug(&self) -> &'static str {
        "docling"
    }

    #[tracing::instrument(skip_all, fields(doc = document.name()))]
    async fn parse(&self, document: &PdfDocument) -> Result<BackendOutput, BackendError> {
        let work_dir = tempfile::tempdir()?;
        let stem = input_stem(document);
        let input_path = work_dir.path().join(format!("{stem}.pdf"));
        let output_dir = work_dir.path().join("out");
        tokio::fs::write(&input_path, document.bytes()).await?;
        tokio::fs::create_dir(&output_dir).await?;

        run_tool(
            &self.config.binary,
            [
                input_path.as_os_str(),
                OsStr::new("--to"),
                OsStr::new("md"),
                OsStr::new("--output"),
                output_dir.as_os_str(),
            ],
        )
        .await?;

        let markdown = read_markdown(&output_dir, &stem).await?;
        let mut output = BackendOutput::new(markdown, None);
        if output.is_blank() {
            output = output.with_warning("docling produced an empty document");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoclingConfig;

    #[test]
    fn test_input_stem_is_sanitized() {
        let doc = PdfDocument::uploaded("my paper (v2).pdf", b"%PDF-".to_vec());
        assert_eq!(input_stem(&doc), "mypaper-v2-");
        let doc = PdfDocument::uploaded("...pdf", b"%PDF-".to_vec());
        assert_eq!(input_stem(&doc), "--");
    }

    #[tokio::test]
    async fn test_read_markdown_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_markdown(dir.path(), "paper").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));

        tokio::fs::write(dir.path().join("paper.md"), "## Results")
            .await
            .unwrap();
        assert_eq!(
            read_markdown(dir.path(), "paper").await.unwrap(),
            "## Results"
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let backend = DoclingBackend::new(DoclingConfig {
            binary: "chemparse-no-docling-here".into(),
        });
        let doc = PdfDocument::uploaded("paper.pdf", b"%PDF-1.4\n%%EOF".to_vec());
        let err = backend.parse(&doc).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingTool { .. }));
    }
}
