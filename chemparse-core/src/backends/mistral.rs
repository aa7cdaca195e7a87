use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};

use super::ParseBackend;
use crate::{
    config::{MistralConfig, MISTRAL_API_KEY_ENV},
    entities::{BackendOutput, PdfDocument},
    error::BackendError,
};

/// Hours the signed document URL stays valid
const SIGNED_URL_EXPIRY_HOURS: &str = "24";

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OcrDocument<'a> {
    DocumentUrl { document_url: &'a str },
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument<'a>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    index: usize,
    markdown: String,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

impl OcrResponse {
    fn into_output(mut self) -> BackendOutput {
        self.pages.sort_by_key(|p| p.index);
        let page_count = self.pages.len();
        let markdown = self
            .pages
            .into_iter()
            .map(|p| p.markdown + "\n\n")
            .collect::<String>();
        let output = BackendOutput::new(markdown, Some(page_count));
        if output.is_blank() {
            output.with_warning("Mistral OCR returned no text")
        } else {
            output
        }
    }
}

/// Remote OCR through the Mistral API: upload, sign, process.
pub struct MistralOcrBackend {
    config: MistralConfig,
    /// Build errors are kept and reported by each parse
    client: Result<Client, String>,
}

impl MistralOcrBackend {
    pub fn new(config: MistralConfig) -> Self {
        let client = Client::builder().timeout(config.request_timeout).build();
        Self::with_client(config, client)
    }

    fn with_client(config: MistralConfig, client: reqwest::Result<Client>) -> Self {
        let client = client.map_err(|e| {
            tracing::warn!("can't build the Mistral HTTP client: {e}");
            e.to_string()
        });
        Self { config, client }
    }

    fn client(&self) -> Result<&Client, BackendError> {
        self.client
            .as_ref()
            .map_err(|e| BackendError::HttpClient(e.clone()))
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(BackendError::MissingCredential {
                service: "Mistral",
                variable: MISTRAL_API_KEY_ENV,
            })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn upload(&self, api_key: &str, document: &PdfDocument) -> Result<String, BackendError> {
        let part = multipart::Part::bytes(document.bytes().to_vec())
            .file_name(document.name().to_owned())
            .mime_str("application/pdf")?;
        let form = multipart::Form::new()
            .text("purpose", "ocr")
            .part("file", part);
        let response = self
            .client()?
            .post(self.url("/v1/files"))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadedFile = check_status(response).await?.json().await?;
        tracing::debug!("uploaded {} as file {}", document.name(), uploaded.id);
        Ok(uploaded.id)
    }

    async fn signed_url(&self, api_key: &str, file_id: &str) -> Result<String, BackendError> {
        let response = self
            .client()?
            .get(self.url(&format!("/v1/files/{file_id}/url")))
            .query(&[("expiry", SIGNED_URL_EXPIRY_HOURS)])
            .bearer_auth(api_key)
            .send()
            .await?;
        let signed: SignedUrl = check_status(response).await?.json().await?;
        Ok(signed.url)
    }

    async fn process(&self, api_key: &str, document_url: &str) -> Result<OcrResponse, BackendError> {
        let request = OcrRequest {
            model: &self.config.model,
            document: OcrDocument::DocumentUrl { document_url },
        };
        let response = self
            .client()?
            .post(self.url("/v1/ocr"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("malformed OCR response: {e}")))
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ParseBackend for MistralOcrBackend {
    fn name(&self) -> &'static str {
        "Mistral OCR"
    }

    fn slug(&self) -> &'static str {
        "mistral"
    }

    #[tracing::instrument(skip_all, fields(doc = document.name()))]
    async fn parse(&self, document: &PdfDocument) -> Result<BackendOutput, BackendError> {
        let api_key = self.api_key()?;
        let file_id = self.upload(api_key, document).await?;
        let document_url = self.signed_url(api_key, &file_id).await?;
        let response = self.process(api_key, &document_url).await?;
        Ok(response.into_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use axum::{
        extract::{Multipart, Path, Query},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::{collections::HashMap, time::Duration};
    use tokio::net::TcpListener;

    const KEY: &str = "test-key";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|h| h == format!("Bearer {KEY}"))
    }

    async fn upload(
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> Result<Json<Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let mut purpose = None;
        let mut file_len = 0;
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_owned();
            match name.as_str() {
                "purpose" => purpose = Some(field.text().await.unwrap()),
                "file" => file_len = field.bytes().await.unwrap().len(),
                _ => {}
            }
        }
        assert_eq!(purpose.as_deref(), Some("ocr"));
        assert!(file_len > 0);
        Ok(Json(json!({"id": "file-123", "purpose": "ocr"})))
    }

    async fn signed(
        headers: HeaderMap,
        Path(id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        if !authorized(&headers) || id != "file-123" {
            return Err(StatusCode::NOT_FOUND);
        }
        assert_eq!(query.get("expiry").map(String::as_str), Some("24"));
        Ok(Json(json!({"url": "https://signed.example/file-123"})))
    }

    async fn ocr(Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["model"], "mistral-ocr-latest");
        assert_eq!(body["document"]["type"], "document_url");
        assert_eq!(
            body["document"]["document_url"],
            "https://signed.example/file-123"
        );
        Json(json!({
            "model": "mistral-ocr-2503",
            "pages": [
                {"index": 1, "markdown": "## Results\nYield: 82%", "images": []},
                {"index": 0, "markdown": "# Methyl benzoate", "images": []}
            ],
            "usage_info": {"pages_processed": 2}
        }))
    }

    async fn mock_server() -> String {
        let app = Router::new()
            .route("/v1/files", post(upload))
            .route("/v1/files/:id/url", get(signed))
            .route("/v1/ocr", post(ocr));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn mistral_backend(base_url: String, api_key: Option<&str>) -> MistralOcrBackend {
        MistralOcrBackend::new(MistralConfig {
            api_key: api_key.map(str::to_owned),
            base_url,
            request_timeout: Duration::from_secs(10),
            ..MistralConfig::default()
        })
    }

    fn doc() -> PdfDocument {
        PdfDocument::uploaded("ester.pdf", b"%PDF-1.4\n%%EOF".to_vec())
    }

    #[tokio::test]
    async fn test_full_ocr_flow() {
        let base_url = mock_server().await;
        let output = mistral_backend(base_url, Some(KEY)).parse(&doc()).await.unwrap();
        assert_eq!(
            output.markdown,
            "# Methyl benzoate\n\n## Results\nYield: 82%\n\n"
        );
        assert_eq!(output.pages, Some(2));
        assert!(output.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_never_touches_network() {
        // Nothing listens on this port
        let backend = mistral_backend("http://127.0.0.1:9".into(), None);
        let err = backend.parse(&doc()).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingCredential { .. }));

        let backend = mistral_backend("http://127.0.0.1:9".into(), Some("   "));
        let err = backend.parse(&doc()).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_rejected_key_is_api_error() {
        let base_url = mock_server().await;
        let err = mistral_backend(base_url, Some("wrong"))
            .parse(&doc())
            .await
            .unwrap_err();
        match err {
            BackendError::Api { status, .. } => assert_eq!(status, 401),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_build_failure_is_backend_failure() {
        let client = Client::builder().user_agent("bad\nagent").build();
        let backend = MistralOcrBackend::with_client(
            MistralConfig {
                api_key: Some(KEY.to_owned()),
                base_url: "http://127.0.0.1:9".into(),
                ..MistralConfig::default()
            },
            client,
        );
        let err = backend.parse(&doc()).await.unwrap_err();
        assert!(matches!(err, BackendError::HttpClient(_)));
        assert_eq!(err.kind(), FailureKind::Http);
    }

    #[test]
    fn test_blank_response_warns() {
        let response: OcrResponse =
            serde_json::from_value(json!({"pages": [{"index": 0, "markdown": " "}]})).unwrap();
        let output = response.into_output();
        assert_eq!(output.warnings, vec!["Mistral OCR returned no text"]);
    }
}
