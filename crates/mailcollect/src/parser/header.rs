//! Header field extraction on top of `mail_parser`.
//!
//! Decoding (RFC 2047 words, folding, charsets) is left to `mail_parser`;
//! undecodable bytes come back as UTF-8 with replacement characters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mail_parser::{Address, Header, HeaderName, HeaderValue, Message};

use crate::model::EmailAddress;

/// Header fields in message order as `(name, value)`, names as received.
pub fn header_fields(message: &Message, raw: &[u8]) -> Vec<(String, String)> {
    message
        .headers()
        .iter()
        .filter_map(|header| {
            let name = field_name(header, raw)?;
            Some((name, field_value(header, raw)))
        })
        .collect()
}

/// Folds fields into a map. Repeated headers keep their last value.
pub fn header_map(fields: &[(String, String)]) -> HashMap<String, String> {
    fields.iter().cloned().collect()
}

/// First value of a field, looked up case-insensitively.
pub fn find_field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// `Message-ID` exactly as sent, angle brackets included.
pub fn message_id(message: &Message) -> Option<String> {
    message
        .header_raw(HeaderName::MessageId)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| message.message_id().map(|id| format!("<{}>", id)))
}

/// The `Date` header in UTC, or `None` when it is missing or not a date.
pub fn timestamp(message: &Message) -> Option<DateTime<Utc>> {
    message
        .date()
        .filter(|date| date.is_valid())
        .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0))
}

/// Every mailbox of an address header, groups flattened. Entries without
/// an address are dropped.
pub fn addresses(value: Option<&Address>) -> Vec<EmailAddress> {
    value
        .map(|address| {
            address
                .iter()
                .filter_map(|addr| {
                    let mailbox = addr.address()?.trim();
                    if mailbox.is_empty() {
                        return None;
                    }
                    Some(EmailAddress::new(mailbox, addr.name().map(str::to_string)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Name slice between the field start and the colon.
fn field_name(header: &Header, raw: &[u8]) -> Option<String> {
    let bytes = raw.get(header.offset_field as usize..header.offset_start as usize)?;
    let name = String::from_utf8_lossy(bytes);
    let name = name.trim().trim_end_matches(':').trim_end();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn field_value(header: &Header, raw: &[u8]) -> String {
    match (&header.name, &header.value) {
        (_, HeaderValue::Address(address)) => addresses(Some(address))
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        (
            HeaderName::Subject | HeaderName::Comments | HeaderName::Other(_),
            HeaderValue::Text(text),
        ) => text.to_string(),
        _ => raw_value(header, raw),
    }
}

/// The value as sent, unfolded onto one line.
fn raw_value(header: &Header, raw: &[u8]) -> String {
    let bytes = raw
        .get(header.offset_start as usize..header.offset_end as usize)
        .unwrap_or_default();
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
