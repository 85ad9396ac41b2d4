use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Attachment, EmailAddress};

/// Message priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    /// Infers priority from an `X-Priority` or `Importance` header value.
    ///
    /// Keywords win over the numeric form (`1 (Highest)`, `5 (Lowest)`).
    pub fn from_header(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.contains("high") || lower.contains("urgent") {
            return Priority::High;
        }
        if lower.contains("low") {
            return Priority::Low;
        }
        match lower.trim().chars().next() {
            Some('1') | Some('2') => Priority::High,
            Some('4') | Some('5') => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Read state of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Read,
    #[default]
    Unread,
    Flagged,
    Draft,
    Deleted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Read => "read",
            Status::Unread => "unread",
            Status::Flagged => "flagged",
            Status::Draft => "draft",
            Status::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Status::Read),
            "unread" => Ok(Status::Unread),
            "flagged" => Ok(Status::Flagged),
            "draft" => Ok(Status::Draft),
            "deleted" => Ok(Status::Deleted),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// A message normalized from any backend.
///
/// `id` is the `Message-ID` header for IMAP/POP3 and the Graph object id for
/// Graph. The two id spaces are unrelated; ids are only unique within one
/// collection result.
#[derive(Debug, Clone, Default)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub sender: EmailAddress,
    pub recipients: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub timestamp: DateTime<Utc>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub priority: Priority,
    pub status: Status,
    pub headers: HashMap<String, String>,
    pub source_folder: Option<String>,
}

impl EmailMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Plain text body, falling back to the HTML body.
    pub fn body(&self) -> Option<&str> {
        self.body_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.body_html.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_header() {
        assert_eq!(Priority::from_header("1 (Highest)"), Priority::High);
        assert_eq!(Priority::from_header("Urgent"), Priority::High);
        assert_eq!(Priority::from_header("high"), Priority::High);
        assert_eq!(Priority::from_header("5 (Lowest)"), Priority::Low);
        assert_eq!(Priority::from_header("low"), Priority::Low);
        assert_eq!(Priority::from_header("3 (Normal)"), Priority::Normal);
        assert_eq!(Priority::from_header(""), Priority::Normal);
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            Status::Read,
            Status::Unread,
            Status::Flagged,
            Status::Draft,
            Status::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
        assert!("archived".parse::<Status>().is_err());
    }

    #[test]
    fn test_body_falls_back_to_html() {
        let msg = EmailMessage {
            body_text: Some("  ".into()),
            body_html: Some("<p>hi</p>".into()),
            ..Default::default()
        };
        assert_eq!(msg.body(), Some("<p>hi</p>"));
    }
}
