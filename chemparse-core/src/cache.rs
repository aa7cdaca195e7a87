use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::entities::{BackendOutput, ExampleDoc};

/// On-disk cache of example conversions, one markdown file per example and backend:
/// `<dir>/<example stem>_<backend slug>.md`.
///
/// Uploads are never cached. Only complete outputs are stored so that a failed or
/// partial conversion is retried on the next selection.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Opens the cache, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("can't create cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, example: ExampleDoc, slug: &str) -> PathBuf {
        let file_name = example.file_name();
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);
        self.dir.join(format!("{stem}_{slug}.md"))
    }

    pub async fn load(&self, example: ExampleDoc, slug: &str) -> Option<BackendOutput> {
        let path = self.entry_path(example, slug);
        match tokio::fs::read_to_string(&path).await {
            Ok(markdown) => {
                tracing::debug!("cache hit {}", path.display());
                Some(BackendOutput::new(markdown, None))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("can't read cache entry {}: {e}", path.display());
                None
            }
        }
    }

    /// Returns whether the output was written.
    pub async fn store(
        &self,
        example: ExampleDoc,
        slug: &str,
        output: &BackendOutput,
    ) -> std::io::Result<bool> {
        if output.is_partial() || output.is_blank() {
            return Ok(false);
        }
        let path = self.entry_path(example, slug);
        tokio::fs::write(&path, &output.markdown).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_path_naming() {
        let cache = ResultCache {
            dir: PathBuf::from("cache"),
        };
        assert_eq!(
            cache.entry_path(ExampleDoc::Ocr, "tesseract"),
            PathBuf::from("cache/Ocr_tesseract.md")
        );
        assert_eq!(
            cache.entry_path(ExampleDoc::NonOcr, "mistral"),
            PathBuf::from("cache/Non_Ocr_mistral.md")
        );
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(tmp.path().join("nested/cache")).unwrap();
        assert!(cache.load(ExampleDoc::Ocr, "docling").await.is_none());

        let output = BackendOutput::new("# Caffeine".into(), Some(1));
        assert!(cache
            .store(ExampleDoc::Ocr, "docling", &output)
            .await
            .unwrap());
        let loaded = cache.load(ExampleDoc::Ocr, "docling").await.unwrap();
        assert_eq!(loaded.markdown, "# Caffeine");
        assert!(cache.load(ExampleDoc::NonOcr, "docling").await.is_none());
    }

    #[tokio::test]
    async fn test_partial_and_blank_outputs_are_not_stored() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(tmp.path()).unwrap();

        let partial = BackendOutput::new("text".into(), Some(2)).with_warning("page 2: failed");
        assert!(!cache.store(ExampleDoc::Ocr, "pdfium", &partial).await.unwrap());
        let blank = BackendOutput::new("\n\n".into(), Some(1));
        assert!(!cache.store(ExampleDoc::Ocr, "pdfium", &blank).await.unwrap());
        assert!(cache.load(ExampleDoc::Ocr, "pdfium").await.is_none());
    }
}
