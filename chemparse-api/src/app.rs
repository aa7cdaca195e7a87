use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{AppendHeaders, Html, IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use chemparse_core::{
    render::html::render_page, session::Selection, ComparisonHarness, ExampleDoc, InvalidInput,
    PdfDocument, SessionStore, Submission,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const MAX_SIZE_LIMIT: usize = 250 * 1024 * 1024;
pub const SESSION_COOKIE: &str = "chemparse_session";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ApiResponse::err(error)))
}

#[derive(Clone)]
pub struct AppState {
    pub harness: Arc<ComparisonHarness>,
    pub sessions: Arc<RwLock<SessionStore>>,
}

impl AppState {
    pub fn new(harness: ComparisonHarness) -> Self {
        Self {
            harness: Arc::new(harness),
            sessions: Arc::default(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/examples/:example", post(select_example))
        .route("/health", get(health_check))
        .route("/api/compare", post(compare_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(OtelAxumLayer::default())
        .layer(DefaultBodyLimit::max(MAX_SIZE_LIMIT))
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

fn session_cookie(id: Uuid) -> AppendHeaders<[(axum::http::HeaderName, String); 1]> {
    AppendHeaders([(
        SET_COOKIE,
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"),
    )])
}

/// Reads the `file` field of an upload form.
async fn read_upload(mut multipart: Multipart) -> Result<PdfDocument, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Failed to get next field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload.pdf")
            .to_owned();
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {e}")))?;
        return Ok(PdfDocument::uploaded(filename, data.to_vec()));
    }
    Err(api_error(StatusCode::BAD_REQUEST, InvalidInput::MissingFile))
}

async fn begin_selection(state: &AppState, session: Uuid) -> Selection {
    state
        .sessions
        .write()
        .await
        .get_or_create(session)
        .begin_selection()
}

/// Saves the outcome of `selection`. A newer selection of the same session wins.
async fn store_outcome(
    state: &AppState,
    session: Uuid,
    selection: Selection,
    result: Result<Submission, String>,
) {
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_or_create(session);
    let current = match result {
        Ok(submission) => session.complete(selection, Arc::new(submission)),
        Err(e) => {
            tracing::warn!("rejected input: {e}");
            session.fail(selection, e)
        }
    };
    if !current {
        tracing::debug!("a newer selection superseded this one");
    }
}

#[tracing::instrument(skip_all)]
async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = session_id(&headers).unwrap_or_else(Uuid::new_v4);
    let (active, error) = {
        let mut sessions = state.sessions.write().await;
        let session = sessions.get_or_create(id);
        (session.active(), session.take_error())
    };
    let page = render_page(active.as_deref(), error.as_deref())
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok((session_cookie(id), Html(page)))
}

#[tracing::instrument(skip_all)]
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> impl IntoResponse {
    let id = session_id(&headers).unwrap_or_else(Uuid::new_v4);
    let selection = begin_selection(&state, id).await;
    let result = match read_upload(multipart).await {
        Ok(document) => state
            .harness
            .compare(document)
            .await
            .map_err(|e| e.to_string()),
        Err((_, Json(response))) => Err(response.error.unwrap_or_default()),
    };
    store_outcome(&state, id, selection, result).await;
    (session_cookie(id), Redirect::to("/"))
}

#[tracing::instrument(skip_all)]
async fn select_example(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(example): Path<ExampleDoc>,
) -> impl IntoResponse {
    let id = session_id(&headers).unwrap_or_else(Uuid::new_v4);
    let selection = {
        let mut sessions = state.sessions.write().await;
        let session = sessions.get_or_create(id);
        (!session.activate_example(example)).then(|| session.begin_selection())
    };

    match selection {
        None => tracing::debug!("reusing {} results of this session", example.slug()),
        Some(selection) => {
            let result = match state.harness.load_example(example).await {
                Ok(document) => state.harness.compare(document).await,
                Err(e) => Err(e),
            };
            store_outcome(&state, id, selection, result.map_err(|e| e.to_string())).await;
        }
    }
    (session_cookie(id), Redirect::to("/"))
}

#[tracing::instrument(skip_all)]
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("Service is healthy"))
}

#[tracing::instrument(skip_all)]
async fn compare_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<Submission>>, ApiError> {
    let document = read_upload(multipart).await?;
    let submission = state
        .harness
        .compare(document)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    Ok(Json(ApiResponse::ok(submission)))
}
