//! Destination filename derivation.
//!
//! Precedence: caller-suggested name, then Content-Disposition, then the
//! final URL's last path segment, then a MIME-derived extension on the
//! literal `download` stem. Every candidate is sanitized before use.

mod content_disposition;
mod mime_map;

pub use content_disposition::filename_from_content_disposition;
pub use mime_map::extension_for_mime;

use content_disposition::percent_decode;

/// Fallback stem when nothing better is known.
const FALLBACK_STEM: &str = "download";

/// Derive the destination filename for a task.
pub fn derive_filename(
    suggested: Option<&str>,
    content_disposition: Option<&str>,
    final_url: &str,
    content_type: Option<&str>,
) -> String {
    if let Some(name) = suggested {
        let s = sanitize_filename(name);
        if !s.is_empty() {
            return s;
        }
    }

    if let Some(cd) = content_disposition {
        if let Some(name) = filename_from_content_disposition(cd) {
            let s = sanitize_filename(&name);
            if !s.is_empty() {
                return s;
            }
        }
    }

    if let Some(segment) = filename_from_url_path(final_url) {
        let s = sanitize_filename(&segment);
        if !s.is_empty() {
            return s;
        }
    }

    match content_type.and_then(extension_for_mime) {
        Some(ext) => format!("{FALLBACK_STEM}.{ext}"),
        None => FALLBACK_STEM.to_string(),
    }
}

/// Extracts the last path segment from a URL for use as a filename hint.
/// Percent-escapes are decoded. Returns `None` for empty or root paths.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()
        .and_then(|s| s.filter(|p| !p.is_empty()).last())?;
    if segment == "." || segment == ".." {
        return None;
    }
    let decoded = percent_decode(segment);
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

/// Sanitizes a candidate filename for safe use on a Unix filesystem.
///
/// - Replaces NUL, `/`, `\`, control characters, and whitespace with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing spaces, dots, and underscores
/// - Limits length to 255 bytes (NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            '_'
        } else if c == ' ' || c == '\t' {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '\t' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}
