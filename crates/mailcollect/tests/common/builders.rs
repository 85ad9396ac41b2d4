//! Builders for Graph payloads and normalized messages.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use mailcollect::model::{Attachment, EmailAddress, EmailMessage};

/// Builder for one Graph message resource.
pub struct GraphMessageBuilder {
    value: Value,
}

impl GraphMessageBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            value: json!({
                "id": id,
                "subject": format!("Message {}", id),
                "from": {"emailAddress": {"address": "sender@contoso.com", "name": "Sender"}},
                "toRecipients": [{"emailAddress": {"address": "me@contoso.com"}}],
                "receivedDateTime": "2024-03-15T10:30:00Z",
                "body": {"contentType": "text", "content": "Hello"},
                "importance": "normal",
                "isRead": false,
                "attachments": []
            }),
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.value["subject"] = json!(subject);
        self
    }

    pub fn from(mut self, address: &str) -> Self {
        self.value["from"] = json!({"emailAddress": {"address": address}});
        self
    }

    pub fn attachment(mut self, id: &str, name: &str, content_type: &str, size: u64) -> Self {
        if let Some(list) = self.value["attachments"].as_array_mut() {
            list.push(json!({"id": id, "name": name, "contentType": content_type, "size": size}));
        }
        self
    }

    pub fn build(self) -> Value {
        self.value
    }
}

/// `count` messages with ids `{prefix}-{start}` onwards.
pub fn graph_messages(prefix: &str, start: usize, count: usize) -> Vec<Value> {
    (start..start + count)
        .map(|i| GraphMessageBuilder::new(&format!("{}-{}", prefix, i)).build())
        .collect()
}

/// An OData collection page.
pub fn odata_page(items: Vec<Value>, next_link: Option<String>) -> Value {
    let mut page = json!({ "value": items });
    if let Some(link) = next_link {
        page["@odata.nextLink"] = json!(link);
    }
    page
}

/// A normalized message as a collector would produce it.
pub fn sample_message(id: &str, sender: &str, subject: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        subject: subject.to_string(),
        sender: EmailAddress::new(sender, Some("Sample Sender".to_string())),
        recipients: vec![EmailAddress::new("me@example.com", None)],
        timestamp: Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap(),
        body_text: Some("Hello,\nplease find the report attached.".to_string()),
        ..Default::default()
    }
}

pub fn with_attachment(mut message: EmailMessage, filename: &str, content: &[u8]) -> EmailMessage {
    message.attachments.push(Attachment {
        filename: filename.to_string(),
        content_type: "application/pdf".to_string(),
        size_bytes: content.len() as u64,
        content: content.to_vec(),
        content_id: None,
    });
    message
}
