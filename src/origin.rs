//! Client for the single remote origin this instance mirrors.
//!
//! Every request carries the configured `Referer`; the origin refuses to
//! serve assets without it.  [`OriginClient::fetch`] is used by the request
//! handler and relays whatever the origin answers, while
//! [`OriginClient::fetch_bytes`] is the connection-free primitive the
//! refresh job uses and treats any non-2xx answer as an error.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header;
use thiserror::Error;
use tracing::debug;

use crate::cache::resolver::{INDEX_FILE, is_current_dir};
use crate::config::OriginConfig;

/// Failure talking to the origin.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect, DNS, TLS or timeout failure before a response arrived.
    #[error("origin unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The response started but the body could not be read to the end.
    #[error("failed to read origin response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The origin answered with a non-2xx status.
    #[error("origin returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// The origin URL the failed request targeted.
    pub fn url(&self) -> &str {
        match self {
            Self::Unreachable { url, .. } | Self::Body { url, .. } | Self::Status { url, .. } => {
                url
            }
        }
    }
}

/// A fully buffered origin response.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl OriginResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct OriginClient {
    http: reqwest::Client,
    prefix: String,
    referer: String,
}

impl OriginClient {
    /// Build a client for `prefix` with the timeouts and referer from `config`.
    pub fn new(prefix: &str, config: &OriginConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lazymirror/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            prefix: prefix.trim_end_matches('/').to_owned(),
            referer: config.referer.clone(),
        })
    }

    /// The origin prefix, without a trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Origin URL for `request_path`.
    ///
    /// Directory requests (trailing `/` or a final `.` segment) get
    /// `index.html` appended.  Unlike the cache key, the query string is
    /// forwarded.
    pub fn origin_url(&self, request_path: &str) -> String {
        let (path, query) = match request_path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request_path, None),
        };
        let path = match path.rsplit_once('/') {
            Some((head, last)) if is_current_dir(last) => &path[..=head.len()],
            _ => path,
        };

        let mut url = self.prefix.clone();
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
        if url.ends_with('/') {
            url.push_str(INDEX_FILE);
        }
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// `GET` the origin URL for `request_path` and buffer the response.
    ///
    /// Any HTTP status is returned as `Ok`; only transport failures are
    /// errors.
    pub async fn fetch(&self, request_path: &str) -> Result<OriginResponse, FetchError> {
        let url = self.origin_url(request_path);
        debug!(%url, "fetching from origin");

        let resp = self
            .http
            .get(&url)
            .header(header::REFERER, &self.referer)
            .send()
            .await
            .map_err(|source| FetchError::Unreachable {
                url: url.clone(),
                source,
            })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = resp.bytes().await.map_err(|source| FetchError::Body {
            url: url.clone(),
            source,
        })?;

        debug!(%url, status, bytes = body.len(), "origin responded");
        Ok(OriginResponse {
            url,
            status,
            content_type,
            body,
        })
    }

    /// Fetch the bytes behind `request_path`, failing on non-2xx answers.
    pub async fn fetch_bytes(&self, request_path: &str) -> Result<Bytes, FetchError> {
        let resp = self.fetch(request_path).await?;
        if !resp.is_success() {
            return Err(FetchError::Status {
                url: resp.url,
                status: resp.status,
            });
        }
        Ok(resp.body)
    }

    /// `HEAD` the origin prefix.  Any HTTP answer counts as reachable.
    pub async fn probe(&self) -> Result<u16, FetchError> {
        let url = format!("{}/", self.prefix);
        let resp = self
            .http
            .head(&url)
            .header(header::REFERER, &self.referer)
            .send()
            .await
            .map_err(|source| FetchError::Unreachable {
                url: url.clone(),
                source,
            })?;
        Ok(resp.status().as_u16())
    }
}
