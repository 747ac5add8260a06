//! Origin metadata probing and resume validation.
//!
//! A lightweight HEAD first; origins that refuse it (403/405) or answer an
//! extensionless URL with HTML get a single-byte range GET instead, and the
//! headers are re-read from that response.

use crate::error::DownloadError;
use crate::store::Credentials;
use crate::transport::{FetchMeta, Transport};

/// Result of probing a URL: everything the coordinator needs to partition
/// the file and pin validators.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// URL after redirects; used for all subsequent byte fetches.
    pub final_url: String,
    /// Total size in bytes; None if the origin did not say.
    pub content_length: Option<u64>,
    /// True if the origin serves byte ranges.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

/// True when a HEAD answer looks like an HTML landing page for a URL whose
/// last path segment carries no extension. Those origins routinely serve
/// the real payload only on GET.
fn html_for_extensionless(url: &str, meta: &FetchMeta) -> bool {
    let is_html = meta
        .content_type
        .as_deref()
        .map(|ct| {
            let ct = ct.split(';').next().unwrap_or(ct).trim();
            ct.eq_ignore_ascii_case("text/html") || ct.eq_ignore_ascii_case("application/xhtml+xml")
        })
        .unwrap_or(false);
    if !is_html {
        return false;
    }
    let extensionless = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|s| s.last().map(|seg| !seg.contains('.')))
        })
        .unwrap_or(true);
    extensionless
}

fn result_from_head(meta: FetchMeta) -> ProbeResult {
    ProbeResult {
        final_url: meta.final_url,
        content_length: meta.content_length,
        accept_ranges: meta.accept_ranges,
        etag: meta.etag,
        last_modified: meta.last_modified,
        content_disposition: meta.content_disposition,
        content_type: meta.content_type,
    }
}

/// Probe via a one-byte range GET and read the metadata off that response.
async fn probe_via_range(
    transport: &Transport,
    url: &str,
    creds: &Credentials,
) -> Result<ProbeResult, DownloadError> {
    let (meta, stream) = transport.fetch(url, 0, Some(0), creds).await?;
    drop(stream);
    // 206 proves range support even without an Accept-Ranges header. A 200
    // means the origin ignored the Range and sent the whole body.
    let ranged = meta.status == 206;
    Ok(ProbeResult {
        content_length: if ranged {
            meta.total_size
        } else {
            meta.content_length
        },
        accept_ranges: ranged || meta.accept_ranges,
        final_url: meta.final_url,
        etag: meta.etag,
        last_modified: meta.last_modified,
        content_disposition: meta.content_disposition,
        content_type: meta.content_type,
    })
}

/// Probe a URL for size, range support, and validators.
pub async fn probe(
    transport: &Transport,
    url: &str,
    creds: &Credentials,
) -> Result<ProbeResult, DownloadError> {
    let head = transport.head(url, creds).await?;
    match head.status {
        status if (200..300).contains(&status) => {
            if html_for_extensionless(url, &head) {
                probe_via_range(transport, url, creds).await
            } else {
                Ok(result_from_head(head))
            }
        }
        403 | 405 => probe_via_range(transport, url, creds).await,
        status => Err(DownloadError::from_status(status)),
    }
}

/// Compare pinned validators against a fresh probe. Validators are immutable
/// after the first successful probe; any drift means the origin changed the
/// resource and partial bytes cannot be trusted.
pub fn check_validators(
    stored_etag: Option<&str>,
    stored_last_modified: Option<&str>,
    probed: &ProbeResult,
) -> Result<(), DownloadError> {
    if stored_etag.is_none() && stored_last_modified.is_none() {
        return Ok(());
    }
    let etag_changed = match (stored_etag, probed.etag.as_deref()) {
        (None, _) => false,
        (Some(a), Some(b)) => a != b,
        (Some(_), None) => true,
    };
    let last_modified_changed = match (stored_last_modified, probed.last_modified.as_deref()) {
        (None, _) => false,
        (Some(a), Some(b)) => a != b,
        (Some(_), None) => true,
    };
    if etag_changed || last_modified_changed {
        return Err(DownloadError::FileModified);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content_type: Option<&str>) -> FetchMeta {
        FetchMeta {
            status: 200,
            final_url: "https://example.com/file".into(),
            content_length: Some(10),
            total_size: None,
            accept_ranges: false,
            etag: None,
            last_modified: None,
            content_disposition: None,
            content_type: content_type.map(str::to_string),
        }
    }

    fn result(etag: Option<&str>, last_modified: Option<&str>) -> ProbeResult {
        ProbeResult {
            final_url: "https://example.com/file".into(),
            content_length: Some(10),
            accept_ranges: true,
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
            content_disposition: None,
            content_type: None,
        }
    }

    #[test]
    fn html_heuristic_requires_both_conditions() {
        assert!(html_for_extensionless(
            "https://example.com/dl/12345",
            &meta(Some("text/html; charset=utf-8"))
        ));
        // Extension present: trust the HEAD.
        assert!(!html_for_extensionless(
            "https://example.com/page.html",
            &meta(Some("text/html"))
        ));
        // Not HTML: trust the HEAD.
        assert!(!html_for_extensionless(
            "https://example.com/dl/12345",
            &meta(Some("application/zip"))
        ));
        assert!(!html_for_extensionless("https://example.com/dl/12345", &meta(None)));
    }

    #[test]
    fn validators_match_passes() {
        let probed = result(Some("v1"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert!(check_validators(Some("v1"), Some("Mon, 01 Jan 2024 00:00:00 GMT"), &probed).is_ok());
        // Nothing stored yet: first probe pins.
        assert!(check_validators(None, None, &probed).is_ok());
    }

    #[test]
    fn etag_drift_is_file_modified() {
        let probed = result(Some("v2"), None);
        assert!(matches!(
            check_validators(Some("v1"), None, &probed),
            Err(DownloadError::FileModified)
        ));
    }

    #[test]
    fn validator_disappearing_is_file_modified() {
        let probed = result(None, None);
        assert!(matches!(
            check_validators(Some("v1"), None, &probed),
            Err(DownloadError::FileModified)
        ));
    }

    #[test]
    fn stored_none_ignores_new_validator() {
        // Only the etag was pinned; a fresh Last-Modified appearing is fine.
        let probed = result(Some("v1"), Some("Tue, 02 Jan 2024 00:00:00 GMT"));
        assert!(check_validators(Some("v1"), None, &probed).is_ok());
    }
}
