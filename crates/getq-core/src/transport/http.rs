//! Streaming reqwest transport: the primary backend.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;

use super::headers::parse_content_range_total;
use super::{FetchMeta, REDIRECT_LIMIT};
use crate::error::DownloadError;
use crate::store::Credentials;

/// Async HTTP transport over a shared connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

/// Lazy chunk sequence of one HTTP response body.
pub struct HttpChunkStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
}

impl HttpChunkStream {
    pub(super) async fn next_chunk(&mut self) -> Option<Result<Bytes, DownloadError>> {
        self.inner
            .next()
            .await
            .map(|r| r.map_err(|e| DownloadError::ConnectionFailed(e.to_string())))
    }
}

fn credential_headers(creds: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(cookies) = &creds.cookies {
        if let Ok(v) = HeaderValue::from_str(cookies) {
            headers.insert(header::COOKIE, v);
        }
    }
    if let Some(referrer) = &creds.referrer {
        if let Ok(v) = HeaderValue::from_str(referrer) {
            headers.insert(header::REFERER, v);
        }
    }
    if let Some(user_agent) = &creds.user_agent {
        if let Ok(v) = HeaderValue::from_str(user_agent) {
            headers.insert(header::USER_AGENT, v);
        }
    }
    headers
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn meta_from_response(resp: &reqwest::Response) -> FetchMeta {
    let headers = resp.headers();
    FetchMeta {
        status: resp.status().as_u16(),
        final_url: resp.url().to_string(),
        content_length: header_str(headers, header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok()),
        total_size: header_str(headers, header::CONTENT_RANGE)
            .and_then(|v| parse_content_range_total(&v)),
        accept_ranges: header_str(headers, header::ACCEPT_RANGES)
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false),
        etag: header_str(headers, header::ETAG).map(|v| v.trim_matches('"').to_string()),
        last_modified: header_str(headers, header::LAST_MODIFIED),
        content_disposition: header_str(headers, header::CONTENT_DISPOSITION),
        content_type: header_str(headers, header::CONTENT_TYPE),
    }
}

impl HttpTransport {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DownloadError::ConnectionFailed(e.to_string()))?;
        Ok(HttpTransport { client })
    }

    /// Metadata request. Returns the response meta regardless of status so
    /// the probe can decide on its fallback.
    pub async fn head(&self, url: &str, creds: &Credentials) -> Result<FetchMeta, DownloadError> {
        let resp = self
            .client
            .head(url)
            .headers(credential_headers(creds))
            .send()
            .await
            .map_err(|e| DownloadError::ConnectionFailed(e.to_string()))?;
        Ok(meta_from_response(&resp))
    }

    /// Range GET. `end` None requests `bytes=start-` (open-ended).
    /// Non-2xx statuses are translated into the error taxonomy.
    pub async fn fetch(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
        creds: &Credentials,
    ) -> Result<(FetchMeta, HttpChunkStream), DownloadError> {
        let range = match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        let mut headers = credential_headers(creds);
        // A full-file request (start 0, no end) skips the Range header so
        // origins that reject ranges outright still serve the body.
        let full_file = start == 0 && end.is_none();
        if !full_file {
            headers.insert(header::RANGE, HeaderValue::from_str(&range).unwrap());
        }

        let resp = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| DownloadError::ConnectionFailed(e.to_string()))?;

        let meta = meta_from_response(&resp);
        if !resp.status().is_success() {
            return Err(DownloadError::from_status(meta.status));
        }
        let stream = HttpChunkStream {
            inner: resp.bytes_stream().boxed(),
        };
        Ok((meta, stream))
    }
}
