//! Request path decoding and validation.

use percent_encoding::percent_decode_str;

/// Percent-decode a request path. Returns `None` for invalid UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    percent_decode_str(input)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Validate a decoded path before joining it with the document root:
/// it must be absolute and free of NUL bytes, backslashes and dot
/// segments.
pub fn check_path(path: &str) -> bool {
    if !path.starts_with('/') {
        return false;
    }
    if path.contains('\0') || path.contains('\\') {
        return false;
    }
    !path.split('/').any(|segment| segment == ".." || segment == ".")
}
