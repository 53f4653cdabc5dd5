// src/services/filename.rs

//! Attachment filename recovery.
//!
//! The boards this engine targets disagree about where the real filename
//! lives (Content-Disposition, link text, URL path) and routinely declare
//! the wrong charset for it, mixing UTF-8 with the legacy euc-kr/cp949
//! family. Resolution tries each source in a fixed precedence and never
//! fails: when everything is unusable a synthetic name is produced.

use encoding_rs::{EUC_KR, Encoding, UTF_8};

/// Maximum filename length in characters, extension preserved.
const MAX_NAME_CHARS: usize = 200;

/// Resolve the on-disk name for one attachment.
///
/// Precedence, first usable candidate wins:
/// 1. RFC 5987 extended form (`filename*=charset''value`)
/// 2. Plain `filename=` value, re-decoded through the declared encoding,
///    then euc-kr, then UTF-8
/// 3. The trailing URL path segment, when it looks like a file name
/// 4. The link text
/// 5. `attachment_<seq>.bin`
///
/// Every candidate is sanitized for filesystem safety before being
/// returned. The function is total: it never panics and never returns an
/// empty string.
pub fn resolve_filename(
    content_disposition: Option<&str>,
    link_text: &str,
    url_path: &str,
    declared: Option<&'static Encoding>,
    seq: usize,
) -> String {
    if let Some(header) = content_disposition {
        if let Some(name) = from_extended_form(header) {
            return name;
        }
        if let Some(name) = from_plain_form(header, declared) {
            return name;
        }
    }
    if let Some(name) = from_url_path(url_path) {
        return name;
    }
    if let Some(name) = clean(link_text) {
        return name;
    }
    format!("attachment_{seq}.bin")
}

/// RFC 5987: `filename*=charset'lang'percent-encoded`.
fn from_extended_form(header: &str) -> Option<String> {
    let idx = find_ignore_case(header, "filename*=")?;
    let value = header[idx + "filename*=".len()..].trim_start();

    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?.trim();
    let _lang = parts.next()?;
    let rest = parts.next()?;
    let encoded = rest.split(';').next().unwrap_or(rest).trim().trim_matches('"');

    let bytes = urlencoding::decode_binary(encoded.as_bytes());
    let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8);
    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        return None;
    }
    clean(&text)
}

/// Plain `filename=` value. The server sent raw legacy-encoded bytes that
/// arrived reinterpreted as single-byte Latin characters; undo that and
/// try each plausible encoding until one decodes cleanly.
fn from_plain_form(header: &str, declared: Option<&'static Encoding>) -> Option<String> {
    let idx = find_ignore_case(header, "filename=")?;
    let raw = header[idx + "filename=".len()..].trim_start();
    let raw = match raw.strip_prefix('"') {
        Some(stripped) => stripped.split('"').next().unwrap_or(stripped),
        None => raw.split(';').next().unwrap_or(raw).trim(),
    };
    if raw.is_empty() {
        return None;
    }
    // RFC 2047 encoded-words are emitted by some misconfigured servers;
    // they are not recoverable here and must not pass as a literal name.
    if raw.starts_with("=?") && raw.trim_end().ends_with("?=") {
        return None;
    }

    let value = raw.replace('+', " ");
    let Some(bytes) = latin1_bytes(&value) else {
        // Already multibyte text, so the transport did not mangle it.
        return clean(&value);
    };

    for encoding in decode_candidates(declared) {
        let (text, _, had_errors) = encoding.decode(&bytes);
        if !had_errors && !text.contains('\u{FFFD}') && !text.trim().is_empty() {
            return clean(&text);
        }
    }
    None
}

/// Trailing URL path segment, percent-decoded. Only accepted when it
/// carries a real file extension; dynamic-page endpoints (`.do`, `.jsp`,
/// ...) are not filenames.
fn from_url_path(url_path: &str) -> Option<String> {
    let segment = url_path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }

    let decoded = match urlencoding::decode(segment) {
        Ok(cow) => cow.into_owned(),
        Err(_) => {
            let bytes = urlencoding::decode_binary(segment.as_bytes());
            let (text, _, had_errors) = EUC_KR.decode(&bytes);
            if had_errors {
                return None;
            }
            text.into_owned()
        }
    };

    if !has_file_extension(&decoded) {
        return None;
    }
    clean(&decoded)
}

/// Remove characters illegal on common filesystems, collapse whitespace
/// runs, and bound the length while preserving the extension.
pub fn sanitize_filename(name: &str) -> String {
    // Undo any remaining percent-encoding first.
    let name = match urlencoding::decode(name) {
        Ok(cow) => cow.into_owned(),
        Err(_) => name.to_string(),
    };

    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim().trim_matches('.').trim();

    truncate_preserving_extension(trimmed, MAX_NAME_CHARS)
}

fn truncate_preserving_extension(name: &str, limit: usize) -> String {
    if name.chars().count() <= limit {
        return name.to_string();
    }

    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext: String = name[idx..].chars().collect();
            let ext_len = ext.chars().count();
            if ext_len >= limit {
                return name.chars().take(limit).collect();
            }
            let stem: String = name.chars().take(limit - ext_len).collect();
            format!("{stem}{ext}")
        }
        _ => name.chars().take(limit).collect(),
    }
}

fn clean(name: &str) -> Option<String> {
    let sanitized = sanitize_filename(name);
    (!sanitized.is_empty()).then_some(sanitized)
}

/// Encodings to try for a mangled plain filename, in order: the site's
/// declared encoding, the legacy euc-kr family (the WHATWG euc-kr decoder
/// covers the cp949 superset), then UTF-8.
fn decode_candidates(declared: Option<&'static Encoding>) -> Vec<&'static Encoding> {
    let mut candidates: Vec<&'static Encoding> = Vec::with_capacity(3);
    if let Some(encoding) = declared {
        candidates.push(encoding);
    }
    for encoding in [EUC_KR, UTF_8] {
        if !candidates.iter().any(|e| *e == encoding) {
            candidates.push(encoding);
        }
    }
    candidates
}

/// Recover the raw bytes of a header value that was read as Latin-1.
/// Returns None when the value contains characters above U+00FF, i.e. it
/// was already decoded correctly.
fn latin1_bytes(value: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(value.len());
    for c in value.chars() {
        let cp = c as u32;
        if cp > 0xFF {
            return None;
        }
        out.push(cp as u8);
    }
    Some(out)
}

fn has_file_extension(name: &str) -> bool {
    let Some(idx) = name.rfind('.') else {
        return false;
    };
    let ext = &name[idx + 1..];
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    !matches!(
        ext.to_ascii_lowercase().as_str(),
        "do" | "php" | "jsp" | "asp" | "aspx" | "html" | "htm" | "cgi" | "json"
    )
}

/// Byte-wise ASCII case-insensitive substring search. Safe to slice at
/// the returned index because the needle is pure ASCII.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
