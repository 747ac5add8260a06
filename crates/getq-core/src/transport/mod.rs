//! Network transports behind one seam.
//!
//! One capability — `{head, fetch}` — implemented by a streaming reqwest
//! client and a blocking libcurl fallback. Selection happens per task at
//! start time from the URL scheme and the configured backend; construction
//! is tagged-variant, no trait objects.

mod curl;
mod headers;
mod http;

use bytes::Bytes;

pub use self::curl::{CurlChunkStream, CurlTransport};
pub use self::http::{HttpChunkStream, HttpTransport};

use crate::config::Backend;
use crate::error::DownloadError;
use crate::store::Credentials;

/// Redirect hops followed before giving up.
pub const REDIRECT_LIMIT: usize = 10;

/// Metadata of one HTTP response, independent of backend.
#[derive(Debug, Clone)]
pub struct FetchMeta {
    pub status: u16,
    /// URL after redirects; replaces the task's source for byte fetches.
    pub final_url: String,
    /// `Content-Length` of this response body.
    pub content_length: Option<u64>,
    /// Total resource size from `Content-Range` (present on 206 responses).
    pub total_size: Option<u64>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

/// Finite, non-restartable chunk sequence of one response body. On early
/// termination, re-`fetch` from the advanced offset.
pub enum ChunkStream {
    Http(HttpChunkStream),
    Curl(CurlChunkStream),
}

impl ChunkStream {
    /// Next body chunk; `None` on clean end of stream.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, DownloadError>> {
        match self {
            ChunkStream::Http(s) => s.next_chunk().await,
            ChunkStream::Curl(s) => s.next_chunk().await,
        }
    }
}

/// A task's transport for the lifetime of one run.
#[derive(Clone)]
pub enum Transport {
    Http(HttpTransport),
    Curl(CurlTransport),
}

impl Transport {
    /// Select and construct the transport for a URL. Only http/https are
    /// supported; anything else is rejected at ingest with `InvalidUrl`.
    pub fn for_url(url: &str, backend: Backend) -> Result<Self, DownloadError> {
        let parsed =
            url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(DownloadError::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {url}"
                )))
            }
        }
        Ok(match backend {
            Backend::Http => Transport::Http(HttpTransport::new()?),
            Backend::Curl => Transport::Curl(CurlTransport),
        })
    }

    /// Metadata request. Returns meta for any status; transport faults map
    /// to `ConnectionFailed`.
    pub async fn head(&self, url: &str, creds: &Credentials) -> Result<FetchMeta, DownloadError> {
        match self {
            Transport::Http(t) => t.head(url, creds).await,
            Transport::Curl(t) => t.head(url, creds).await,
        }
    }

    /// Byte-range request for `[start, end]` (inclusive; `end` None means
    /// open-ended). 2xx yields a lazy chunk stream; other statuses are
    /// translated: 503 `ServiceUnavailable`, 416 `RangeNotSatisfiable`,
    /// remaining 4xx/5xx `ServerError(code)`.
    pub async fn fetch(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
        creds: &Credentials,
    ) -> Result<(FetchMeta, ChunkStream), DownloadError> {
        match self {
            Transport::Http(t) => {
                let (meta, stream) = t.fetch(url, start, end, creds).await?;
                Ok((meta, ChunkStream::Http(stream)))
            }
            Transport::Curl(t) => {
                let (meta, stream) = t.fetch(url, start, end, creds).await?;
                Ok((meta, ChunkStream::Curl(stream)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            Transport::for_url("ftp://example.com/f", Backend::Http),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(matches!(
            Transport::for_url("not a url", Backend::Http),
            Err(DownloadError::InvalidUrl(_))
        ));
    }

    #[test]
    fn selects_configured_backend() {
        assert!(matches!(
            Transport::for_url("https://example.com/f", Backend::Http),
            Ok(Transport::Http(_))
        ));
        assert!(matches!(
            Transport::for_url("https://example.com/f", Backend::Curl),
            Ok(Transport::Curl(_))
        ));
    }
}
