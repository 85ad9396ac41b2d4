//! Translation of [`EmailFilter`] into Graph OData query parameters.
//!
//! Graph cannot combine `$search` with `$filter`, so a filter with a subject
//! (or body) term runs in search mode and the structured predicates are
//! evaluated client-side instead. Whatever the chosen mode cannot express
//! ends up in the residual filter.

use chrono::{DateTime, Utc};

use crate::model::EmailFilter;

/// Attachment metadata requested alongside every message.
pub const EXPAND_ATTACHMENTS: &str =
    "attachments($select=id,name,contentType,size,isInline,contentId)";

/// How the message listing is queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    /// `$filter` (possibly empty) ordered by `receivedDateTime desc`.
    Filter(Option<String>),
    /// Full-text `$search` with the given term.
    Search(String),
}

/// A query plus the predicates left for client-side evaluation.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub mode: QueryMode,
    pub residual: EmailFilter,
}

impl QueryPlan {
    pub fn from_filter(filter: &EmailFilter) -> Self {
        let mut residual = EmailFilter {
            recipient: filter.recipient.clone(),
            status: filter.status,
            priority: filter.priority,
            ..Default::default()
        };

        let search_term = filter
            .subject_contains
            .clone()
            .or_else(|| filter.body_contains.clone());

        let mode = match search_term {
            Some(term) => {
                residual.sender = filter.sender.clone();
                residual.date_from = filter.date_from;
                residual.date_to = filter.date_to;
                residual.has_attachments = filter.has_attachments;
                if filter.subject_contains.is_some() {
                    residual.body_contains = filter.body_contains.clone();
                }
                QueryMode::Search(term)
            }
            None => QueryMode::Filter(odata_filter(filter)),
        };

        Self { mode, residual }
    }

    /// Query parameters for one page request.
    pub fn params(&self, top: usize, skiptoken: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![("$top".to_string(), top.to_string())];
        match &self.mode {
            QueryMode::Filter(filter) => {
                params.push(("$orderby".to_string(), "receivedDateTime desc".to_string()));
                if let Some(filter) = filter {
                    params.push(("$filter".to_string(), filter.clone()));
                }
            }
            QueryMode::Search(term) => {
                params.push(("$search".to_string(), format!("\"{}\"", term.replace('"', ""))));
            }
        }
        params.push(("$expand".to_string(), EXPAND_ATTACHMENTS.to_string()));
        if let Some(token) = skiptoken {
            params.push(("$skiptoken".to_string(), token.to_string()));
        }
        params
    }

    pub fn is_search(&self) -> bool {
        matches!(self.mode, QueryMode::Search(_))
    }
}

/// Builds the `$filter` expression for the structured predicates, or
/// `None` when none are set.
pub fn odata_filter(filter: &EmailFilter) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(from) = filter.date_from {
        clauses.push(format!("receivedDateTime ge {}", odata_datetime(from)));
    }
    if let Some(to) = filter.date_to {
        clauses.push(format!("receivedDateTime le {}", odata_datetime(to)));
    }
    if let Some(sender) = &filter.sender {
        clauses.push(format!(
            "from/emailAddress/address eq '{}'",
            sender.replace('\'', "''")
        ));
    }
    if let Some(has) = filter.has_attachments {
        clauses.push(format!("hasAttachments eq {}", has));
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" and "))
    }
}

fn odata_datetime(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
