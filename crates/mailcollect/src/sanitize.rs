//! Helpers for turning untrusted message data into safe file names and log text.
//!
//! Provider error bodies can echo tokens back, so they are truncated before
//! they reach logs or error messages.

use std::path::Path;

/// Maximum length for provider error bodies embedded in errors.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Maximum length of the subject fragment in persisted file names.
const MAX_SUBJECT_LENGTH: usize = 50;

/// Maximum length of the message-id fragment in persisted file names.
const MAX_SHORT_ID_LENGTH: usize = 10;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Truncates a provider error body on a character boundary.
pub fn redact_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}

/// Subject fragment for file names: alphanumerics, spaces, `-` and `_`,
/// right-trimmed and capped at 50 characters.
pub fn sanitize_subject(subject: &str) -> String {
    let kept: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().chars().take(MAX_SUBJECT_LENGTH).collect()
}

/// Short id fragment: angle brackets removed, part before `@`, first 10 chars.
pub fn short_message_id(id: &str) -> String {
    let stripped = id.trim().trim_start_matches('<').trim_end_matches('>');
    let local = stripped.split('@').next().unwrap_or_default();
    local
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .take(MAX_SHORT_ID_LENGTH)
        .collect()
}

/// Single path component built from alphanumerics, `-` and `_`.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Attachment file name: alphanumerics, `.`, `-` and `_`; everything else
/// becomes `_`. Leading dots are removed so names never hide or traverse.
pub fn sanitize_filename(filename: &str) -> String {
    let mapped: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = mapped.trim_start_matches('.');
    if trimmed.len() > 255 {
        let ext_start = trimmed.rfind('.').unwrap_or(trimmed.len());
        let ext = &trimmed[ext_start..];
        let keep = 255usize.saturating_sub(ext.len().min(50));
        let base: String = trimmed[..ext_start].chars().take(keep).collect();
        format!("{}{}", base, ext)
    } else if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Converts a MIME type to a file extension.
pub fn mime_to_extension(mime_type: &str) -> &'static str {
    match mime_type.to_lowercase().as_str() {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/calendar" => "ics",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}
