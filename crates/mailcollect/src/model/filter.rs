//! Query criteria shared by every collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailMessage, Priority, Status};

/// Criteria for selecting messages. Present fields are AND-combined; absent
/// fields impose no constraint.
///
/// Each collector pushes what it can to the server and documents the rest:
///
/// | field | IMAP | POP3 | Graph |
/// |---|---|---|---|
/// | sender, recipient | server | client | sender: server (filter mode); recipient: client |
/// | subject, body | server | client | server (`$search`) |
/// | dates | server, day granularity | client | server (filter mode) |
/// | has_attachments | server when `true`, ignored when `false` | client | server (filter mode) |
/// | status, priority | ignored | client | client |
/// | folder | mailbox name | ignored | folder id or well-known name |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub subject_contains: Option<String>,
    pub body_contains: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub folder: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub has_attachments: Option<bool>,
    pub max_results: Option<usize>,
}

impl EmailFilter {
    /// Evaluates every content predicate against an already-normalized
    /// message. `folder` and `max_results` are not content predicates and are
    /// ignored here.
    ///
    /// Text comparisons are case-insensitive; `sender` is a substring match
    /// on the address, `recipient` must equal one of the `To` addresses.
    pub fn matches(&self, message: &EmailMessage) -> bool {
        if let Some(sender) = &self.sender {
            if !contains_ci(&message.sender.address, sender) {
                return false;
            }
        }

        if let Some(recipient) = &self.recipient {
            let wanted = recipient.trim();
            if !message
                .recipients
                .iter()
                .any(|r| r.address.eq_ignore_ascii_case(wanted))
            {
                return false;
            }
        }

        if let Some(subject) = &self.subject_contains {
            if !contains_ci(&message.subject, subject) {
                return false;
            }
        }

        if let Some(body) = &self.body_contains {
            let in_text = message
                .body_text
                .as_deref()
                .is_some_and(|t| contains_ci(t, body));
            let in_html = message
                .body_html
                .as_deref()
                .is_some_and(|h| contains_ci(h, body));
            if !in_text && !in_html {
                return false;
            }
        }

        if let Some(from) = self.date_from {
            if message.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.date_to {
            if message.timestamp > to {
                return false;
            }
        }

        if let Some(wanted) = self.has_attachments {
            if message.has_attachments() != wanted {
                return false;
            }
        }

        if let Some(status) = self.status {
            if message.status != status {
                return false;
            }
        }

        if let Some(priority) = self.priority {
            if message.priority != priority {
                return false;
            }
        }

        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, EmailAddress};
    use chrono::TimeZone;

    fn sample() -> EmailMessage {
        EmailMessage {
            id: "<1@example.com>".into(),
            subject: "Urgent Meeting".into(),
            sender: EmailAddress::new("Boss@Corp.example", Some("Boss".into())),
            recipients: vec![EmailAddress::new("me@example.com", None)],
            timestamp: Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap(),
            body_text: Some("Please join the call".into()),
            body_html: Some("<p>Agenda attached</p>".into()),
            attachments: vec![Attachment::new("agenda.pdf", "application/pdf", vec![1, 2])],
            ..Default::default()
        }
    }

    #[test]
    fn test_subject_is_case_insensitive() {
        let msg = sample();
        let hit = EmailFilter {
            subject_contains: Some("urgent".into()),
            ..Default::default()
        };
        let miss = EmailFilter {
            subject_contains: Some("unrelated".into()),
            ..Default::default()
        };
        assert!(hit.matches(&msg));
        assert!(!miss.matches(&msg));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EmailFilter::default();
        assert!(filter.matches(&sample()));
    }

    #[test]
    fn test_sender_substring_and_recipient_membership() {
        let msg = sample();
        let filter = EmailFilter {
            sender: Some("corp.example".into()),
            recipient: Some("ME@example.com".into()),
            ..Default::default()
        };
        assert!(filter.matches(&msg));

        let partial_recipient = EmailFilter {
            recipient: Some("me@".into()),
            ..Default::default()
        };
        assert!(!partial_recipient.matches(&msg));
    }

    #[test]
    fn test_body_checks_text_and_html() {
        let msg = sample();
        for needle in ["join the call", "AGENDA"] {
            let filter = EmailFilter {
                body_contains: Some(needle.into()),
                ..Default::default()
            };
            assert!(filter.matches(&msg), "expected match for {needle}");
        }
    }

    #[test]
    fn test_date_range_inclusive() {
        let msg = sample();
        let filter = EmailFilter {
            date_from: Some(msg.timestamp),
            date_to: Some(msg.timestamp),
            ..Default::default()
        };
        assert!(filter.matches(&msg));

        let later = EmailFilter {
            date_from: Some(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!later.matches(&msg));
    }

    #[test]
    fn test_attachment_status_priority() {
        let msg = sample();
        let no_attachments = EmailFilter {
            has_attachments: Some(false),
            ..Default::default()
        };
        assert!(!no_attachments.matches(&msg));

        let read_only = EmailFilter {
            status: Some(Status::Read),
            ..Default::default()
        };
        assert!(!read_only.matches(&msg));

        let normal = EmailFilter {
            priority: Some(Priority::Normal),
            ..Default::default()
        };
        assert!(normal.matches(&msg));
    }
}
