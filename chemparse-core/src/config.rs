use std::{path::PathBuf, time::Duration};

use clap::Args;

pub const MISTRAL_API_KEY_ENV: &str = "MISTRAL_API_KEY";
pub const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-ocr-latest";

#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub binary: String,
    pub lang: String,
    /// Page segmentation mode passed as `--psm`
    pub psm: u8,
    /// Rasterisation resolution of each page before OCR
    pub dpi: u32,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_owned(),
            lang: "eng".to_owned(),
            psm: 3,
            dpi: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DoclingConfig {
    pub binary: String,
}

impl Default for DoclingConfig {
    fn default() -> Self {
        Self {
            binary: "docling".to_owned(),
        }
    }
}

#[derive(Clone)]
pub struct MistralConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for MistralConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_MISTRAL_BASE_URL.to_owned(),
            model: DEFAULT_MISTRAL_MODEL.to_owned(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

// Keeps the key out of logs
impl std::fmt::Debug for MistralConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistralConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PdfiumConfig {
    /// Full path to the pdfium shared library. Uses the system library when None.
    pub library_path: Option<PathBuf>,
}

/// Everything the harness and its backends need.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub tesseract: TesseractConfig,
    pub docling: DoclingConfig,
    pub mistral: MistralConfig,
    pub pdfium: PdfiumConfig,
    /// Upper bound on a single backend invocation
    pub backend_timeout: Duration,
    pub examples_dir: PathBuf,
    /// Where example conversions are cached. Disabled when None.
    pub cache_dir: Option<PathBuf>,
    /// Backend slugs to register. Every backend when None.
    pub enabled_backends: Option<Vec<String>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tesseract: TesseractConfig::default(),
            docling: DoclingConfig::default(),
            mistral: MistralConfig::default(),
            pdfium: PdfiumConfig::default(),
            backend_timeout: Duration::from_secs(300),
            examples_dir: PathBuf::from("demos"),
            cache_dir: None,
            enabled_backends: None,
        }
    }
}

impl HarnessConfig {
    pub fn is_enabled(&self, slug: &str) -> bool {
        match &self.enabled_backends {
            Some(slugs) => slugs.iter().any(|s| s.eq_ignore_ascii_case(slug)),
            None => true,
        }
    }
}

/// Backend options shared by the API server and the CLI.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[arg(
        long,
        env = "TESSERACT_BIN",
        default_value = "tesseract",
        help = "Tesseract executable"
    )]
    pub tesseract_bin: String,

    #[arg(
        long,
        env = "TESSERACT_LANG",
        default_value = "eng",
        help = "Tesseract language(s), e.g. 'eng+deu'"
    )]
    pub tesseract_lang: String,

    #[arg(long, default_value_t = 3, help = "Tesseract page segmentation mode")]
    pub tesseract_psm: u8,

    #[arg(
        long,
        default_value_t = 200,
        help = "Resolution used to rasterise pages before OCR"
    )]
    pub ocr_dpi: u32,

    #[arg(
        long,
        env = "DOCLING_BIN",
        default_value = "docling",
        help = "Docling executable"
    )]
    pub docling_bin: String,

    /// Path to the pdfium shared library
    #[arg(
        long,
        env = "PDFIUM_DYNAMIC_LIB_PATH",
        help = "Path to the pdfium shared library (defaults to the system library)"
    )]
    pub pdfium_lib_path: Option<PathBuf>,

    #[arg(long, env = MISTRAL_API_KEY_ENV, hide_env_values = true, help = "Mistral API key")]
    pub mistral_api_key: Option<String>,

    #[arg(long, env = "MISTRAL_BASE_URL", default_value = DEFAULT_MISTRAL_BASE_URL)]
    pub mistral_base_url: String,

    #[arg(long, default_value = DEFAULT_MISTRAL_MODEL, help = "Mistral OCR model")]
    pub mistral_model: String,

    #[arg(
        long,
        default_value_t = 300,
        help = "Maximum time in seconds a single backend may take"
    )]
    pub backend_timeout_secs: u64,

    #[arg(
        long,
        env = "CHEMPARSE_EXAMPLES_DIR",
        default_value = "demos",
        help = "Directory holding Ocr.pdf and Non_Ocr.pdf"
    )]
    pub examples_dir: PathBuf,

    #[arg(
        long,
        env = "CHEMPARSE_CACHE_DIR",
        help = "Directory caching example conversions"
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        long = "only",
        value_delimiter = ',',
        help = "Only run these backends (tesseract, docling, pdfium, mistral)"
    )]
    pub only: Vec<String>,
}

impl From<BackendArgs> for HarnessConfig {
    fn from(args: BackendArgs) -> Self {
        let backend_timeout = Duration::from_secs(args.backend_timeout_secs);
        Self {
            tesseract: TesseractConfig {
                binary: args.tesseract_bin,
                lang: args.tesseract_lang,
                psm: args.tesseract_psm,
                dpi: args.ocr_dpi,
            },
            docling: DoclingConfig {
                binary: args.docling_bin,
            },
            mistral: MistralConfig {
                api_key: args.mistral_api_key,
                base_url: args.mistral_base_url,
                model: args.mistral_model,
                request_timeout: backend_timeout,
            },
            pdfium: PdfiumConfig {
                library_path: args.pdfium_lib_path,
            },
            backend_timeout,
            examples_dir: args.examples_dir,
            cache_dir: args.cache_dir,
            enabled_backends: (!args.only.is_empty()).then_some(args.only),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ExampleDoc;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        backends: BackendArgs,
    }

    #[test]
    fn test_backend_args_into_config() {
        let cli = TestCli::parse_from([
            "test",
            "--only",
            "pdfium,Mistral",
            "--backend-timeout-secs",
            "12",
            "--mistral-api-key",
            "secret",
        ]);
        let config = HarnessConfig::from(cli.backends);
        assert!(config.is_enabled("pdfium"));
        assert!(config.is_enabled("mistral"));
        assert!(!config.is_enabled("tesseract"));
        assert_eq!(config.backend_timeout, Duration::from_secs(12));
        assert_eq!(config.mistral.api_key.as_deref(), Some("secret"));
        assert!(!format!("{:?}", config.mistral).contains("secret"));
    }

    #[test]
    fn test_examples_dir_defaults() {
        let cli = TestCli::parse_from(["test"]);
        let config = HarnessConfig::from(cli.backends);
        assert_eq!(config.examples_dir, HarnessConfig::default().examples_dir);
        assert_eq!(
            ExampleDoc::Ocr.path(&config.examples_dir),
            PathBuf::from("demos/Ocr.pdf")
        );

        let cli = TestCli::parse_from(["test", "--examples-dir", "examples"]);
        let config = HarnessConfig::from(cli.backends);
        assert_eq!(
            ExampleDoc::NonOcr.path(&config.examples_dir),
            PathBuf::from("examples/Non_Ocr.pdf")
        );
    }

    #[test]
    fn test_default_enables_everything() {
        let config = HarnessConfig::default();
        for slug in ["tesseract", "docling", "pdfium", "mistral"] {
            assert!(config.is_enabled(slug));
        }
    }
}
