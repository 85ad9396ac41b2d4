//! RFC 822 message normalization shared by the IMAP and POP3 collectors.

pub mod header;

use chrono::{DateTime, Utc};
use log::debug;
use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};

use crate::error::{MailError, Result};
use crate::model::{Attachment, EmailMessage, Priority, Status};
use crate::sanitize::mime_to_extension;

use header::{addresses, find_field, header_fields, header_map, message_id};

/// Turns raw RFC 822 payloads into [`EmailMessage`]s.
///
/// Messages without a parseable `Date` header are stamped with the
/// collection time instead of being rejected.
#[derive(Debug, Clone)]
pub struct EmailParser {
    collected_at: DateTime<Utc>,
    folder: Option<String>,
}

impl EmailParser {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            collected_at,
            folder: None,
        }
    }

    /// Sets the folder recorded as `source_folder`.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Parses one raw message. `fallback_id` is used when the message has
    /// no `Message-ID` header.
    pub fn parse(&self, raw: &[u8], fallback_id: &str) -> Result<EmailMessage> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| MailError::Parse(format!("unparseable message {}", fallback_id)))?;

        let fields = header_fields(&parsed, raw);
        if fields.is_empty() {
            return Err(MailError::Parse(format!(
                "message {} has no header block",
                fallback_id
            )));
        }

        let subject = parsed.subject().unwrap_or_default().to_string();
        let sender = addresses(parsed.from()).into_iter().next().unwrap_or_default();
        let recipients = addresses(parsed.to());
        let cc = addresses(parsed.cc());
        let bcc = addresses(parsed.bcc());

        let timestamp = match header::timestamp(&parsed) {
            Some(ts) => ts,
            None => {
                debug!(
                    "Message {} has no usable Date header, using collection time",
                    fallback_id
                );
                self.collected_at
            }
        };

        let id = message_id(&parsed).unwrap_or_else(|| fallback_id.to_string());

        let priority = find_field(&fields, "X-Priority")
            .or_else(|| find_field(&fields, "Importance"))
            .map(Priority::from_header)
            .unwrap_or_default();

        let headers = header_map(&fields);

        let mut body_text = None;
        let mut body_html = None;
        let mut attachments = Vec::new();

        for part in parsed.parts.iter() {
            if is_attachment(part) {
                if let Some(attachment) = extract_attachment(part) {
                    attachments.push(attachment);
                }
                continue;
            }
            match &part.body {
                PartType::Text(text) if body_text.is_none() => {
                    body_text = Some(text.to_string());
                }
                PartType::Html(html) if body_html.is_none() => {
                    body_html = Some(html.to_string());
                }
                _ => {}
            }
        }

        debug!(
            "Parsed message {} ({} attachments)",
            id,
            attachments.len()
        );

        Ok(EmailMessage {
            id,
            subject,
            sender,
            recipients,
            cc,
            bcc,
            timestamp,
            body_text,
            body_html,
            attachments,
            priority,
            status: Status::Unread,
            headers,
            source_folder: self.folder.clone(),
        })
    }
}

fn is_attachment(part: &MessagePart) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

fn extract_attachment(part: &MessagePart) -> Option<Attachment> {
    let content = part.contents().to_vec();
    if content.is_empty() {
        return None;
    }

    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let filename = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("attachment.{}", mime_to_extension(&content_type)));

    let mut attachment = Attachment::new(filename, content_type, content);
    attachment.content_id = part.content_id().map(str::to_string);
    Some(attachment)
}
