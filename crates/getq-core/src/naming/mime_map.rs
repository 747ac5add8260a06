//! Fixed MIME-to-extension table for naming fallbacks.

/// Canonical extension for a `Content-Type` value, or None when no extension
/// should be appended. `text/html` and `application/xhtml+xml` deliberately
/// map to nothing: an HTML answer for an extensionless URL must not grow a
/// `.html` suffix.
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    let ext = match essence.as_str() {
        "text/html" | "application/xhtml+xml" => return None,
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/x-tar" => "tar",
        "application/x-7z-compressed" => "7z",
        "application/x-rar-compressed" | "application/vnd.rar" => "rar",
        "application/x-bzip2" => "bz2",
        "application/x-xz" => "xz",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/x-iso9660-image" => "iso",
        "application/vnd.debian.binary-package" => "deb",
        "application/x-rpm" => "rpm",
        "application/vnd.android.package-archive" => "apk",
        "application/x-msdownload" | "application/x-msdos-program" => "exe",
        "application/x-apple-diskimage" => "dmg",
        "application/epub+zip" => "epub",
        "application/octet-stream" => "bin",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/aac" => "aac",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/mpeg" => "mpeg",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_types_map() {
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("video/mp4"), Some("mp4"));
        assert_eq!(extension_for_mime("application/zip"), Some("zip"));
        assert_eq!(extension_for_mime("application/octet-stream"), Some("bin"));
    }

    #[test]
    fn html_maps_to_nothing() {
        assert_eq!(extension_for_mime("text/html"), None);
        assert_eq!(extension_for_mime("text/html; charset=utf-8"), None);
        assert_eq!(extension_for_mime("application/xhtml+xml"), None);
    }

    #[test]
    fn parameters_and_case_ignored() {
        assert_eq!(extension_for_mime("Image/PNG"), Some("png"));
        assert_eq!(extension_for_mime("application/pdf; name=x"), Some("pdf"));
    }

    #[test]
    fn unknown_types_map_to_nothing() {
        assert_eq!(extension_for_mime("application/x-fancy-custom"), None);
        assert_eq!(extension_for_mime(""), None);
    }
}
