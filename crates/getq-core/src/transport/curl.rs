//! Blocking libcurl fallback transport.
//!
//! The transfer runs on its own thread; body chunks cross into async land
//! over a bounded channel, so backpressure from a slow writer or the rate
//! limiter stalls the curl transfer instead of buffering the file in memory.

use bytes::Bytes;
use std::cell::Cell;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use super::headers::parse_header_lines;
use super::{FetchMeta, REDIRECT_LIMIT};
use crate::error::DownloadError;
use crate::store::Credentials;

/// Fallback transport; stateless, each request builds a fresh easy handle.
#[derive(Clone, Copy, Default)]
pub struct CurlTransport;

/// Chunk sequence fed by the transfer thread.
pub struct CurlChunkStream {
    rx: mpsc::Receiver<Result<Bytes, DownloadError>>,
}

impl CurlChunkStream {
    pub(super) async fn next_chunk(&mut self) -> Option<Result<Bytes, DownloadError>> {
        self.rx.recv().await
    }
}

fn map_curl_error(e: &curl::Error) -> DownloadError {
    DownloadError::ConnectionFailed(e.to_string())
}

fn configure(easy: &mut curl::easy::Easy, url: &str, creds: &Credentials) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(REDIRECT_LIMIT as u32)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    // Abort if throughput drops below 1 KiB/s for 60s instead of using a
    // hard wall-clock timeout that would kill large slow transfers.
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    if let Some(cookies) = &creds.cookies {
        easy.cookie(cookies)?;
    }
    if let Some(referrer) = &creds.referrer {
        easy.referer(referrer)?;
    }
    if let Some(user_agent) = &creds.user_agent {
        easy.useragent(user_agent)?;
    }
    Ok(())
}

/// Tracks redirect hops so the final URL and final header block are known
/// by the time the body starts.
struct HeaderTracker {
    current_url: String,
    lines: Vec<String>,
}

impl HeaderTracker {
    fn new(url: &str) -> Self {
        HeaderTracker {
            current_url: url.to_string(),
            lines: Vec::new(),
        }
    }

    /// Feed one raw header line. Returns the parsed meta when the final
    /// (non-redirect) header block completes.
    fn push_line(&mut self, raw: &[u8]) -> Option<FetchMeta> {
        let Ok(s) = std::str::from_utf8(raw) else {
            return None;
        };
        let line = s.trim_end();
        if !line.is_empty() {
            self.lines.push(line.to_string());
            return None;
        }
        // Blank line: one header block is complete.
        let meta = parse_header_lines(&self.lines, &self.current_url);
        if (300..400).contains(&meta.status) {
            if let Some(loc) = self.lines.iter().find_map(|l| {
                l.split_once(':').and_then(|(n, v)| {
                    n.trim()
                        .eq_ignore_ascii_case("location")
                        .then(|| v.trim().to_string())
                })
            }) {
                if let Ok(base) = url::Url::parse(&self.current_url) {
                    if let Ok(next) = base.join(&loc) {
                        self.current_url = next.to_string();
                    }
                }
            }
            self.lines.clear();
            return None;
        }
        Some(meta)
    }
}

fn head_blocking(url: &str, creds: &Credentials) -> Result<FetchMeta, DownloadError> {
    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, creds).map_err(|e| map_curl_error(&e))?;
    easy.nobody(true).map_err(|e| map_curl_error(&e))?;

    let mut tracker = HeaderTracker::new(url);
    let mut meta: Option<FetchMeta> = None;
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|line| {
                if let Some(m) = tracker.push_line(line) {
                    meta = Some(m);
                }
                true
            })
            .map_err(|e| map_curl_error(&e))?;
        transfer.perform().map_err(|e| map_curl_error(&e))?;
    }
    meta.ok_or_else(|| DownloadError::ConnectionFailed("no response headers".to_string()))
}

fn fetch_blocking(
    url: String,
    start: u64,
    end: Option<u64>,
    creds: Credentials,
    meta_tx: oneshot::Sender<Result<FetchMeta, DownloadError>>,
    chunk_tx: mpsc::Sender<Result<Bytes, DownloadError>>,
) {
    let meta_slot = Cell::new(Some(meta_tx));
    let fail = |e: DownloadError| {
        if let Some(tx) = meta_slot.take() {
            let _ = tx.send(Err(e));
        } else {
            let _ = chunk_tx.blocking_send(Err(e));
        }
    };

    let mut easy = curl::easy::Easy::new();
    if let Err(e) = configure(&mut easy, &url, &creds) {
        fail(map_curl_error(&e));
        return;
    }
    let full_file = start == 0 && end.is_none();
    if !full_file {
        let range = match end {
            Some(end) => format!("{start}-{end}"),
            None => format!("{start}-"),
        };
        if let Err(e) = easy.range(&range) {
            fail(map_curl_error(&e));
            return;
        }
    }

    let mut tracker = HeaderTracker::new(&url);
    // Body chunks flow only for a 2xx final response; error bodies are
    // swallowed so the status decides the outcome.
    let streaming = Cell::new(false);
    let perform_result = {
        let mut transfer = easy.transfer();
        let meta_slot = &meta_slot;
        let streaming_ref = &streaming;
        let chunk_tx_ref = &chunk_tx;
        (|| {
            transfer.header_function(move |line| {
                if let Some(m) = tracker.push_line(line) {
                    streaming_ref.set((200..300).contains(&m.status));
                    if let Some(tx) = meta_slot.take() {
                        let _ = tx.send(Ok(m));
                    }
                }
                true
            })?;
            transfer.write_function(move |data| {
                if !streaming_ref.get() {
                    return Ok(data.len());
                }
                match chunk_tx_ref.blocking_send(Ok(Bytes::copy_from_slice(data))) {
                    Ok(()) => Ok(data.len()),
                    // Receiver gone (pause/cancel): abort the transfer.
                    Err(_) => Ok(0),
                }
            })?;
            transfer.perform()
        })()
    };

    match perform_result {
        Ok(()) => {
            // A completed transfer that never produced a final header block.
            if let Some(tx) = meta_slot.take() {
                let _ = tx.send(Err(DownloadError::ConnectionFailed(
                    "no response headers".to_string(),
                )));
            }
        }
        Err(e) if e.is_write_error() => {
            // Aborted by the dropped receiver; nothing to report.
        }
        Err(e) => fail(map_curl_error(&e)),
    }
}

impl CurlTransport {
    pub async fn head(&self, url: &str, creds: &Credentials) -> Result<FetchMeta, DownloadError> {
        let url = url.to_string();
        let creds = creds.clone();
        tokio::task::spawn_blocking(move || head_blocking(&url, &creds))
            .await
            .map_err(|e| DownloadError::ConnectionFailed(e.to_string()))?
    }

    pub async fn fetch(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
        creds: &Credentials,
    ) -> Result<(FetchMeta, CurlChunkStream), DownloadError> {
        let (meta_tx, meta_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let url_owned = url.to_string();
        let creds = creds.clone();
        std::thread::spawn(move || fetch_blocking(url_owned, start, end, creds, meta_tx, chunk_tx));

        let meta = meta_rx.await.unwrap_or_else(|_| {
            Err(DownloadError::ConnectionFailed("transfer thread exited".to_string()))
        })?;

        if !(200..300).contains(&meta.status) {
            return Err(DownloadError::from_status(meta.status));
        }
        Ok((meta, CurlChunkStream { rx: chunk_rx }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_follows_redirect_blocks() {
        let mut t = HeaderTracker::new("https://example.com/a");
        assert!(t.push_line(b"HTTP/1.1 302 Found\r\n").is_none());
        assert!(t.push_line(b"Location: /b/file.bin\r\n").is_none());
        assert!(t.push_line(b"\r\n").is_none());

        assert!(t.push_line(b"HTTP/1.1 200 OK\r\n").is_none());
        assert!(t.push_line(b"Content-Length: 9\r\n").is_none());
        let meta = t.push_line(b"\r\n").expect("final block");
        assert_eq!(meta.status, 200);
        assert_eq!(meta.content_length, Some(9));
        assert_eq!(meta.final_url, "https://example.com/b/file.bin");
    }
}
