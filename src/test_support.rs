//! Shared fixtures for unit tests: a canned origin server and app state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::config::{Config, SiteConfig};

pub(crate) const TEST_REFERER: &str = "https://games.poki.com/";

/// Path component every mock origin prefix ends with, so tests exercise
/// prefix concatenation rather than bare hosts.
const PREFIX_PATH: &str = "/cdn";

struct Canned {
    status: u16,
    content_type: Option<&'static str>,
    body: &'static [u8],
}

struct OriginState {
    assets: HashMap<String, Canned>,
    hits: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

#[derive(Default)]
pub(crate) struct MockOriginBuilder {
    assets: HashMap<String, Canned>,
}

impl MockOriginBuilder {
    /// Serve `body` with `status` at `path` (relative to the prefix).
    pub(crate) fn asset(
        mut self,
        path: &str,
        status: u16,
        content_type: Option<&'static str>,
        body: &'static [u8],
    ) -> Self {
        self.assets.insert(
            path.to_owned(),
            Canned {
                status,
                content_type,
                body,
            },
        );
        self
    }

    pub(crate) async fn spawn(self) -> MockOrigin {
        let state = Arc::new(OriginState {
            assets: self.assets,
            hits: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .fallback(serve_canned)
            .with_state(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockOrigin { addr, state }
    }
}

/// An origin that answers from a fixed table, counts every request and
/// answers 403 to requests lacking the expected `Referer`.
pub(crate) struct MockOrigin {
    addr: SocketAddr,
    state: Arc<OriginState>,
}

impl MockOrigin {
    pub(crate) fn builder() -> MockOriginBuilder {
        MockOriginBuilder::default()
    }

    pub(crate) fn prefix(&self) -> String {
        format!("http://{}{PREFIX_PATH}", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Path and query of every request received, prefix stripped.
    pub(crate) fn requested(&self) -> Vec<String> {
        self.state.requested.lock().unwrap().clone()
    }
}

async fn serve_canned(
    State(state): State<Arc<OriginState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let full = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    let relative = full.strip_prefix(PREFIX_PATH).unwrap_or(full);
    state.requested.lock().unwrap().push(relative.to_owned());

    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());
    if referer != Some(TEST_REFERER) {
        return (StatusCode::FORBIDDEN, "missing or wrong Referer").into_response();
    }

    let path = uri.path().strip_prefix(PREFIX_PATH).unwrap_or(uri.path());
    let Some(canned) = state.assets.get(path) else {
        return (StatusCode::NOT_FOUND, "no such asset").into_response();
    };

    let status = StatusCode::from_u16(canned.status).unwrap();
    let mut resp = (status, canned.body.to_vec()).into_response();
    match canned.content_type {
        Some(ct) => {
            resp.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        None => {
            resp.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    resp
}

/// An origin prefix on a port nothing listens on.
pub(crate) fn unreachable_prefix() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}{PREFIX_PATH}")
}

/// Config whose normal site mirrors `origin_prefix` into `root`.
pub(crate) fn test_config(root: &Path, origin_prefix: &str) -> Config {
    let mut config = Config::default();
    config.sites.normal = SiteConfig {
        local_root: root.display().to_string(),
        origin_prefix: origin_prefix.to_owned(),
    };
    config.origin.referer = TEST_REFERER.to_owned();
    config.origin.request_timeout_secs = 5;
    config
}

/// App state mirroring `origin_prefix` into `root`.
pub(crate) fn app_state(root: &Path, origin_prefix: &str) -> Arc<AppState> {
    let config = test_config(root, origin_prefix);
    Arc::new(AppState::from_config(Arc::new(config)).unwrap())
}
