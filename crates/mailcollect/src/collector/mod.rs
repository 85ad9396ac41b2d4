//! The collector contract and its four protocol backends.
//!
//! Every backend exposes the same operations through [`Collector`]:
//! batch collection, lazy streaming, folder listing and a connection check.
//! Backend-specific failures are converted into [`MailError`] at this
//! boundary.
//!
//! [`MailError`]: crate::error::MailError

pub mod graph;
pub mod imap;
pub mod oauth2_imap;
pub mod pop3;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::debug;

use crate::error::Result;
use crate::model::{CollectOptions, CollectionResult, EmailFilter, EmailMessage};

pub use graph::{GraphCollector, GraphConfig, MailFolder};
pub use imap::{ImapCollector, ImapConfig};
pub use oauth2_imap::{OAuth2ImapCollector, OAuth2ImapConfig};
pub use pop3::{Pop3Collector, Pop3Config};

/// Lazily produced messages. Each item is either a message or a per-item
/// error; a connection error is yielded once and ends the stream.
pub type MessageStream<'a> = BoxStream<'a, Result<EmailMessage>>;

/// Which protocol a collector speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Imap,
    Pop3,
    OAuth2Imap,
    Graph,
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Imap => "imap",
            CollectorKind::Pop3 => "pop3",
            CollectorKind::OAuth2Imap => "oauth2_imap",
            CollectorKind::Graph => "graph",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations shared by every mail backend.
#[async_trait]
pub trait Collector: Send + Sync {
    fn kind(&self) -> CollectorKind;

    /// Collects messages matching `filter`, bounded by `filter.max_results`.
    ///
    /// Never fails: connection errors end the call early and are reported in
    /// [`CollectionResult::errors`] alongside per-message failures, with
    /// whatever was collected before the failure.
    async fn collect(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult;

    /// Same selection as [`Collector::collect`], yielded one message at a
    /// time. Each call opens a new session.
    fn collect_stream<'a>(
        &'a self,
        filter: &'a EmailFilter,
        options: &'a CollectOptions,
    ) -> MessageStream<'a>;

    /// Server-side mailbox names.
    async fn list_folders(&self) -> Result<Vec<String>>;

    /// Authenticated round-trip without fetching messages. Failures are
    /// logged and reported as `false`.
    async fn test_connection(&self) -> bool;
}

/// Folder precedence: per-call option, then filter, then backend default.
pub(crate) fn resolve_folder(
    filter: &EmailFilter,
    options: &CollectOptions,
    default: &str,
) -> String {
    options
        .folder
        .as_deref()
        .or(filter.folder.as_deref())
        .filter(|f| !f.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Keeps message ids unique within one collection. A message whose
/// `Message-ID` was already handed out gets the backend-local id instead.
#[derive(Debug, Default)]
pub(crate) struct IdGuard {
    seen: HashSet<String>,
}

impl IdGuard {
    pub(crate) fn claim(&mut self, message: &mut EmailMessage, local_id: impl FnOnce() -> String) {
        if self.seen.insert(message.id.clone()) {
            return;
        }
        let replacement = local_id();
        debug!(
            "Duplicate message id {}, using {} instead",
            message.id, replacement
        );
        message.id = replacement;
        self.seen.insert(message.id.clone());
    }
}
