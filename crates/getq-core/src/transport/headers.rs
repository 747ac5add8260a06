//! Raw response-header parsing shared by the curl backend.

use super::FetchMeta;

/// Parse collected header lines (status line + `Name: value` pairs) into a
/// `FetchMeta`. With redirects, curl delivers one block per hop; callers
/// pass the lines of the final block.
pub(super) fn parse_header_lines(lines: &[String], final_url: &str) -> FetchMeta {
    let mut meta = FetchMeta {
        status: 0,
        final_url: final_url.to_string(),
        content_length: None,
        total_size: None,
        accept_ranges: false,
        etag: None,
        last_modified: None,
        content_disposition: None,
        content_type: None,
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            if let Some(code) = line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()) {
                meta.status = code;
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                meta.content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("content-range") {
                meta.total_size = parse_content_range_total(value);
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                meta.accept_ranges = value.eq_ignore_ascii_case("bytes");
            } else if name.eq_ignore_ascii_case("etag") {
                meta.etag = Some(value.trim_matches('"').to_string());
            } else if name.eq_ignore_ascii_case("last-modified") {
                meta.last_modified = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-disposition") {
                meta.content_disposition = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-type") {
                meta.content_type = Some(value.to_string());
            }
        }
    }

    meta
}

/// Total size from a `Content-Range` value: `bytes 0-0/1000` -> 1000.
/// `bytes */N` (the 416 shape) also carries the total. `/*` means unknown.
pub(super) fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim();
    let (_, total) = rest.rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}
