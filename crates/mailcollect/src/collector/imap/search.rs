//! Translation of [`EmailFilter`] into IMAP `SEARCH` criteria.

use chrono::{DateTime, Utc};

use crate::model::EmailFilter;

/// Builds the search key list for `filter`.
///
/// Keys appear in a fixed order (sender, recipient, subject, body, since,
/// before, attachments) and are space-joined, which IMAP treats as AND.
/// Dates are truncated to the day. `status`, `priority` and
/// `has_attachments = false` have no search key and are ignored. An empty
/// filter yields `ALL`.
pub fn build_search_criteria(filter: &EmailFilter) -> String {
    let mut keys: Vec<String> = Vec::new();

    if let Some(sender) = &filter.sender {
        keys.push(format!("FROM {}", quote(sender)));
    }
    if let Some(recipient) = &filter.recipient {
        keys.push(format!("TO {}", quote(recipient)));
    }
    if let Some(subject) = &filter.subject_contains {
        keys.push(format!("SUBJECT {}", quote(subject)));
    }
    if let Some(body) = &filter.body_contains {
        keys.push(format!("BODY {}", quote(body)));
    }
    if let Some(since) = filter.date_from {
        keys.push(format!("SINCE {}", imap_date(since)));
    }
    if let Some(before) = filter.date_to {
        keys.push(format!("BEFORE {}", imap_date(before)));
    }
    if filter.has_attachments == Some(true) {
        keys.push("HASATTACH".to_string());
    }

    if keys.is_empty() {
        return "ALL".to_string();
    }

    let criteria = keys.join(" ");
    if criteria.is_ascii() {
        criteria
    } else {
        format!("CHARSET UTF-8 {}", criteria)
    }
}

/// IMAP date (`15-Mar-2024`).
fn imap_date(date: DateTime<Utc>) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Quoted IMAP string with `\` and `"` escaped.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
