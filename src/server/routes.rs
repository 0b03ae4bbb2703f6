//! HTTP surface
//!
//! Route wiring and request handlers. Handler failures never terminate the
//! process; they are logged and surfaced as JSON error responses.

use std::convert::Infallible;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{any, get, post};
use axum::Router;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::ci::{self, CommandRequest, CommandResult};
use crate::error::Error;
use crate::hub::ReaderHandle;
use crate::server::state::AppState;
use crate::server::REVISION;

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/v1", get(home_v1))
        .route("/v1/ci", post(ci_command))
        .route("/v1/cam/capture", get(cam_capture))
        .route("/v1/stream/", any(invalid_stream_path))
        .route("/v1/stream/{name}", get(stream_out).post(stream_in))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            count_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error response, `{"error": "<message>"}` with the given status
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }

    fn bad_request(message: impl ToString) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    state
        .metrics
        .observe_request(response.status().as_u16(), method.as_str());
    response
}

async fn home() -> Redirect {
    Redirect::temporary("/v1")
}

#[derive(Debug, Serialize)]
struct Resource {
    name: String,
    #[serde(rename = "ref")]
    reference: String,
}

impl Resource {
    fn new(name: &str, reference: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            reference: reference.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HomeV1Response {
    name: String,
    revision: String,
    uptime: u64,
    resources: Vec<Resource>,
}

async fn home_v1(State(state): State<AppState>) -> Json<HomeV1Response> {
    let mut resources = vec![
        Resource::new("metrics", "/metrics"),
        Resource::new("ci", "/v1/ci"),
        Resource::new("cam", "/v1/cam/capture"),
    ];

    if let Some(project) = &state.config.project {
        resources.push(Resource::new("project", project));
    }
    if let Some(operator) = &state.config.operator {
        resources.push(Resource::new("operator", operator));
    }

    Json(HomeV1Response {
        name: state.config.name.clone(),
        revision: REVISION.to_owned(),
        uptime: state.boot.elapsed().as_secs(),
        resources,
    })
}

/// Chunked stream-out: newline-delimited raw items
///
/// The reader handle travels inside the body stream, so any way the
/// response ends (normal close, write error, client disconnect) releases
/// the subscription.
async fn stream_out(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("invalid stream path"));
    }

    tracing::debug!(stream = %name, "stream out");
    let reader = state.manager.get_reader(&name);

    let frames = futures::stream::unfold(reader, |mut reader: ReaderHandle| async move {
        let item = reader.recv().await?;
        let mut framed = BytesMut::with_capacity(item.len() + 1);
        framed.extend_from_slice(&item);
        framed.put_u8(b'\n');
        Some((Ok::<_, Infallible>(framed.freeze()), reader))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(frames),
    )
        .into_response())
}

/// One-shot stream-in: the whole request body becomes one item
async fn stream_in(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("invalid stream path"));
    }

    tracing::debug!(stream = %name, bytes = body.len(), "stream in");
    let writer = state.manager.get_writer(&name);
    let sent = writer.send(body).await;
    writer.release();

    sent.map_err(|e| {
        tracing::error!(stream = %name, error = %e, "error streaming in");
        ApiError::internal("error streaming in")
    })?;

    Ok(StatusCode::OK)
}

async fn invalid_stream_path() -> ApiError {
    tracing::warn!("invalid stream path");
    ApiError::bad_request("invalid stream path")
}

#[derive(Debug, Deserialize)]
struct CiQuery {
    wait: Option<String>,
}

async fn ci_command(
    State(state): State<AppState>,
    Query(query): Query<CiQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type != "application/json" {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "application/json required",
        ));
    }

    let req: CommandRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(error = %e, "failed parsing body");
        ApiError::bad_request("failed parsing body")
    })?;

    let id = ci::accept(&state.manager, &req.command)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed accepting ci command");
            match e {
                Error::EmptyCommand => ApiError::bad_request(e),
                other => ApiError::internal(other),
            }
        })?;

    let mut result = CommandResult {
        id: id.clone(),
        ..CommandResult::default()
    };

    if query.wait.as_deref() == Some("1") {
        let deadline = Instant::now() + state.config.ci_wait_timeout;
        loop {
            if let Some(found) = state.results.fetch(&id) {
                result = found;
                break;
            }
            if Instant::now() >= deadline {
                tracing::error!(id = %id, "timed out waiting for ci command result");
                return Err(ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "timed out waiting for result",
                ));
            }
            tokio::time::sleep(state.config.ci_poll_interval).await;
        }
    }

    Ok((StatusCode::ACCEPTED, Json(result)).into_response())
}

async fn cam_capture(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(path) = &state.config.cam_capture_path else {
        return Err(ApiError::internal("YAKAPI_CAM_CAPTURE_PATH not configured"));
    };

    let content = tokio::fs::read(path).await.map_err(|source| {
        let e = Error::CaptureUnreadable {
            path: path.clone(),
            source,
        };
        tracing::error!(error = %e, "cam capture failed");
        ApiError::internal(e)
    })?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], content).into_response())
}

async fn metrics_text(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state.metrics.encode().map_err(ApiError::internal)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}
