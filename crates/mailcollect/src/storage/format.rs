//! Renderers for the three persisted layouts.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Attachment, EmailAddress, EmailMessage, Priority, Status};

pub const EML_ATTACHMENT_PLACEHOLDER: &str = "[Attachment content not included in EML format]";

const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAddress {
    email: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<&EmailAddress> for StoredAddress {
    fn from(address: &EmailAddress) -> Self {
        Self {
            email: address.address.clone(),
            name: address.display_name.clone(),
        }
    }
}

impl From<StoredAddress> for EmailAddress {
    fn from(stored: StoredAddress) -> Self {
        EmailAddress::new(stored.email, stored.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAttachment {
    filename: String,
    content_type: String,
    size: u64,
    #[serde(default)]
    content_id: Option<String>,
}

/// JSON document layout. Attachment bytes are not embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredMessage {
    message_id: String,
    subject: String,
    sender: StoredAddress,
    #[serde(default)]
    recipients: Vec<StoredAddress>,
    #[serde(default)]
    cc: Vec<StoredAddress>,
    #[serde(default)]
    bcc: Vec<StoredAddress>,
    date: DateTime<Utc>,
    #[serde(default)]
    body_text: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    attachments: Vec<StoredAttachment>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    status: Status,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    folder: Option<String>,
}

impl From<&EmailMessage> for StoredMessage {
    fn from(message: &EmailMessage) -> Self {
        Self {
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            sender: (&message.sender).into(),
            recipients: message.recipients.iter().map(Into::into).collect(),
            cc: message.cc.iter().map(Into::into).collect(),
            bcc: message.bcc.iter().map(Into::into).collect(),
            date: message.timestamp,
            body_text: message.body_text.clone(),
            body_html: message.body_html.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| StoredAttachment {
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                    size: a.size_bytes,
                    content_id: a.content_id.clone(),
                })
                .collect(),
            priority: message.priority,
            status: message.status,
            headers: message
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            folder: message.source_folder.clone(),
        }
    }
}

impl From<StoredMessage> for EmailMessage {
    fn from(stored: StoredMessage) -> Self {
        EmailMessage {
            id: stored.message_id,
            subject: stored.subject,
            sender: stored.sender.into(),
            recipients: stored.recipients.into_iter().map(Into::into).collect(),
            cc: stored.cc.into_iter().map(Into::into).collect(),
            bcc: stored.bcc.into_iter().map(Into::into).collect(),
            timestamp: stored.date,
            body_text: stored.body_text,
            body_html: stored.body_html,
            attachments: stored
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    filename: a.filename,
                    content_type: a.content_type,
                    size_bytes: a.size,
                    content: Vec::new(),
                    content_id: a.content_id,
                })
                .collect(),
            priority: stored.priority,
            status: stored.status,
            headers: stored.headers.into_iter().collect::<HashMap<_, _>>(),
            source_folder: stored.folder,
        }
    }
}

pub fn render_json(message: &EmailMessage) -> Result<String> {
    Ok(serde_json::to_string_pretty(&StoredMessage::from(message))?)
}

pub fn parse_json(content: &str) -> Result<EmailMessage> {
    let stored: StoredMessage = serde_json::from_str(content)?;
    Ok(stored.into())
}

fn join_addresses(addresses: &[EmailAddress]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn sorted_headers(message: &EmailMessage) -> Vec<(&String, &String)> {
    let mut headers: Vec<_> = message.headers.iter().collect();
    headers.sort();
    headers
}

/// Human-readable layout: header block, bodies, attachment list, headers.
pub fn render_text(message: &EmailMessage) -> String {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "Subject: {}", message.subject);
    let _ = writeln!(out, "From: {}", message.sender);
    let _ = writeln!(out, "To: {}", join_addresses(&message.recipients));
    if !message.cc.is_empty() {
        let _ = writeln!(out, "CC: {}", join_addresses(&message.cc));
    }
    let _ = writeln!(out, "Date: {}", message.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Priority: {}", message.priority);
    let _ = writeln!(out, "Status: {}", message.status);
    let _ = writeln!(out, "Folder: {}", message.source_folder.as_deref().unwrap_or(""));
    let _ = writeln!(out, "Message ID: {}", message.id);
    let _ = write!(out, "\n{}\n\n", separator);

    if let Some(text) = &message.body_text {
        let _ = write!(out, "TEXT BODY:\n{}\n\n", text);
    }
    if let Some(html) = &message.body_html {
        let _ = write!(out, "HTML BODY:\n{}\n\n", html);
    }
    if !message.attachments.is_empty() {
        out.push_str("ATTACHMENTS:\n");
        for attachment in &message.attachments {
            let _ = writeln!(
                out,
                "- {} ({}, {} bytes)",
                attachment.filename, attachment.content_type, attachment.size_bytes
            );
        }
    }

    let _ = write!(out, "\n{}\n\nHEADERS:\n", separator);
    for (key, value) in sorted_headers(message) {
        let _ = writeln!(out, "{}: {}", key, value);
    }
    out
}

/// RFC 822-like approximation. Attachments become placeholder parts.
pub fn render_eml(message: &EmailMessage) -> String {
    let boundary = format!("mailcollect-{}", message.timestamp.timestamp());
    let mut out = String::new();

    let _ = write!(out, "Message-ID: {}\r\n", message.id);
    let _ = write!(out, "Subject: {}\r\n", message.subject);
    let _ = write!(out, "From: {}\r\n", message.sender);
    let _ = write!(out, "To: {}\r\n", join_addresses(&message.recipients));
    if !message.cc.is_empty() {
        let _ = write!(out, "Cc: {}\r\n", join_addresses(&message.cc));
    }
    let _ = write!(
        out,
        "Date: {}\r\n",
        message.timestamp.format("%a, %d %b %Y %H:%M:%S %z")
    );
    let _ = write!(out, "X-Priority: {}\r\n", message.priority);
    out.push_str("MIME-Version: 1.0\r\n");
    let _ = write!(
        out,
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    );

    if let Some(text) = &message.body_text {
        let _ = write!(
            out,
            "--{}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            boundary, text
        );
    }
    if let Some(html) = &message.body_html {
        let _ = write!(
            out,
            "--{}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
            boundary, html
        );
    }
    for attachment in &message.attachments {
        let _ = write!(
            out,
            "--{}\r\nContent-Type: {}\r\nContent-Disposition: attachment; filename=\"{}\"\r\nContent-Length: {}\r\n\r\n{}\r\n",
            boundary,
            attachment.content_type,
            attachment.filename.replace('"', ""),
            attachment.size_bytes,
            EML_ATTACHMENT_PLACEHOLDER
        );
    }
    let _ = write!(out, "--{}--\r\n", boundary);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message() -> EmailMessage {
        let mut headers = HashMap::new();
        headers.insert("X-Mailer".to_string(), "Test".to_string());
        EmailMessage {
            id: "<abc@example.com>".into(),
            subject: "Quarterly report".into(),
            sender: EmailAddress::new("boss@corp.example", Some("The Boss".into())),
            recipients: vec![EmailAddress::new("me@corp.example", None)],
            timestamp: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap(),
            body_text: Some("Numbers attached".into()),
            attachments: vec![Attachment::new("q1.pdf", "application/pdf", b"%PDF".to_vec())],
            priority: Priority::High,
            headers,
            ..Default::default()
        }
    }

    #[test]
    fn test_json_round_trip() {
        let original = message();
        let restored = parse_json(&render_json(&original).unwrap()).unwrap();
        assert_eq!(restored.subject, original.subject);
        assert_eq!(restored.sender.address, original.sender.address);
        assert_eq!(restored.timestamp, original.timestamp);
        assert_eq!(restored.attachments.len(), 1);
        assert_eq!(restored.priority, Priority::High);
    }

    #[test]
    fn test_text_layout() {
        let text = render_text(&message());
        assert!(text.starts_with("Subject: Quarterly report\n"));
        assert!(text.contains("From: The Boss <boss@corp.example>\n"));
        assert!(text.contains("TEXT BODY:\nNumbers attached"));
        assert!(text.contains("- q1.pdf (application/pdf, 4 bytes)"));
        assert!(text.contains("HEADERS:\nX-Mailer: Test"));
        assert!(!text.contains("CC:"));
    }

    #[test]
    fn test_eml_uses_placeholder_for_attachments() {
        let eml = render_eml(&message());
        assert!(eml.contains("Date: Fri, 15 Mar 2024 10:30:00 +0000\r\n"));
        assert!(eml.contains("X-Priority: high\r\n"));
        assert!(eml.contains("filename=\"q1.pdf\""));
        assert!(eml.contains(EML_ATTACHMENT_PLACEHOLDER));
        assert!(!eml.contains("%PDF"));
        assert!(eml.trim_end().ends_with("--"));
    }
}
