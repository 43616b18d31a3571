//! Main axum router and HTTP request handlers for the mirror.
//!
//! Routes:
//! - `GET /_mirror/healthz` - Health check
//! - `GET /_mirror/metrics` - Prometheus metrics
//! - `GET /{*path}`         - Asset: local cache, else origin with write-through

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument, warn};

use crate::AppState;
use crate::cache::{ResolveError, store};
use crate::metrics::Outcome;
use crate::origin::OriginResponse;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_mirror/healthz", get(crate::health::health_handler))
        .route("/_mirror/metrics", get(handle_metrics))
        // Everything else is an asset path.
        .fallback(handle_asset)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Any path not claimed by another route.
///
/// Serves the cached copy when one exists.  Otherwise fetches the same path
/// from the origin, writes a successful answer through to the cache and
/// relays the origin's status, content type and body.
#[instrument(skip_all, fields(%uri))]
async fn handle_asset(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Ok((
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "Only GET is supported by the mirror\n",
        )
            .into_response());
    }

    let request_path = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());

    let resolved = state.resolver.resolve(request_path).map_err(|e| {
        warn!(error = %e, "rejected request path");
        state.metrics.metrics.record(Outcome::Rejected);
        AppError::MalformedPath(e)
    })?;

    if is_regular_file(&resolved.local_path).await {
        info!(path = %resolved.local_path.display(), "local request");
        let response = serve_local_file(&resolved.local_path).await?;
        state.metrics.metrics.record(Outcome::Hit);
        return Ok(response);
    }

    info!(
        path = %resolved.local_path.display(),
        directory_index = resolved.directory_index,
        "proxy request"
    );
    fetch_and_populate(&state, request_path, &resolved.local_path).await
}

/// `GET /_mirror/metrics`
///
/// Returns Prometheus metrics collected by the mirror.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// Stream a cached file back verbatim.  No content type is set; clients
/// sniff it.
async fn serve_local_file(path: &Path) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open cached asset: {}", path.display()))?;
    let len = file
        .metadata()
        .await
        .with_context(|| format!("stat cached asset: {}", path.display()))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    Ok(response)
}

/// Fetch `request_path` from the origin, persist a 2xx body at `local_path`,
/// and relay the origin's answer.
async fn fetch_and_populate(
    state: &AppState,
    request_path: &str,
    local_path: &Path,
) -> Result<Response, AppError> {
    let metrics = &state.metrics.metrics;

    let started = Instant::now();
    let fetched = state.origin.fetch(request_path).await;
    metrics
        .origin_fetch_duration_seconds
        .observe(started.elapsed().as_secs_f64());
    let fetched = fetched.map_err(|e| {
        warn!(error = %e, "failed to fetch from origin");
        metrics.record(Outcome::Unreachable);
        AppError::OriginUnreachable {
            url: e.url().to_owned(),
        }
    })?;

    if fetched.is_success() {
        match store::write_through(local_path, fetched.body.clone()).await {
            Ok(()) => {
                metrics.cache_bytes_written.inc_by(fetched.body.len() as u64);
                debug!(path = %local_path.display(), "cached origin response");
            }
            Err(e) => {
                // The client still gets the bytes; the next request refetches.
                metrics.cache_write_failures.inc();
                warn!(error = %format!("{e:#}"), path = %local_path.display(), "cache write failed");
            }
        }
        metrics.record(Outcome::Miss);
    } else {
        warn!(
            status = fetched.status,
            url = %fetched.url,
            "origin returned non-success status, relaying without caching"
        );
        metrics.record(Outcome::Relayed);
    }

    Ok(relay(fetched))
}

/// Turn a buffered origin answer into the client response.
fn relay(fetched: OriginResponse) -> Response {
    let status = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::new(Body::from(fetched.body));
    *response.status_mut() = status;
    if let Some(content_type) = fetched
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    response
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The request path cannot be mapped into the cache root.
    MalformedPath(ResolveError),
    /// The origin could not be reached or its body could not be read.
    OriginUnreachable { url: String },
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::MalformedPath(err) => {
                (StatusCode::BAD_REQUEST, format!("Bad request: {err}\n")).into_response()
            }
            AppError::OriginUnreachable { url } => {
                (StatusCode::NOT_FOUND, format!("File not found: {url}\n")).into_response()
            }
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error\n").into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
