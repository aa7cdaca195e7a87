use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection of a document before any backend is invoked.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("No PDF file was uploaded")]
    MissingFile,

    #[error("`{name}` is empty")]
    Empty { name: String },

    #[error("`{name}` is not a PDF document (missing %PDF- header)")]
    NotPdf { name: String },

    #[error("Example file not found: {}", path.display())]
    ExampleNotFound { path: PathBuf },
}

/// Failure of a single backend. Never escapes the harness: it is recorded in the
/// backend's result slot.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{service} API key is not set ({variable})")]
    MissingCredential {
        service: &'static str,
        variable: &'static str,
    },

    #[error("`{binary}` could not be started: {source}")]
    MissingTool {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{binary}` exited with {status}: {stderr}")]
    ProcessFailed {
        binary: String,
        status: String,
        stderr: String,
    },

    #[error("pdfium: {0}")]
    Pdfium(String),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP client unavailable: {0}")]
    HttpClient(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected output: {0}")]
    InvalidResponse(String),

    #[error("document has no pages")]
    NoPages,

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("backend panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingCredential,
    MissingTool,
    Process,
    Pdfium,
    Http,
    InvalidResponse,
    Timeout,
    Panicked,
    Io,
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::MissingCredential { .. } => FailureKind::MissingCredential,
            BackendError::MissingTool { .. } => FailureKind::MissingTool,
            BackendError::ProcessFailed { .. } => FailureKind::Process,
            BackendError::Pdfium(_) => FailureKind::Pdfium,
            BackendError::Http(_) | BackendError::HttpClient(_) | BackendError::Api { .. } => {
                FailureKind::Http
            }
            BackendError::InvalidResponse(_) | BackendError::NoPages | BackendError::Image(_) => {
                FailureKind::InvalidResponse
            }
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::Panicked(_) => FailureKind::Panicked,
            BackendError::Io(_) => FailureKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_message() {
        let err = BackendError::MissingCredential {
            service: "Mistral",
            variable: "MISTRAL_API_KEY",
        };
        assert_eq!(
            err.to_string(),
            "Mistral API key is not set (MISTRAL_API_KEY)"
        );
        assert_eq!(err.kind(), FailureKind::MissingCredential);
    }

    #[test]
    fn test_example_not_found_message() {
        let err = InvalidInput::ExampleNotFound {
            path: PathBuf::from("demos/Ocr.pdf"),
        };
        assert_eq!(err.to_string(), "Example file not found: demos/Ocr.pdf");
    }
}
