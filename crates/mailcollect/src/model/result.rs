use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::EmailMessage;

/// Outcome of one collection call.
///
/// `total_count` is the number of candidates before `max_results`
/// truncation where the backend can tell (IMAP search hits, POP3 mailbox
/// size); for Graph it is the number of items walked. `filtered_count` is
/// always `messages.len()`.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub messages: Vec<EmailMessage>,
    pub total_count: usize,
    pub filtered_count: usize,
    pub collected_at: DateTime<Utc>,
    pub errors: Vec<String>,
    pub saved_files: Vec<PathBuf>,
}

impl CollectionResult {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            total_count: 0,
            filtered_count: 0,
            collected_at: Utc::now(),
            errors: Vec::new(),
            saved_files: Vec::new(),
        }
    }

    /// An empty result carrying a single fatal error.
    pub fn failed(error: impl Display) -> Self {
        let mut result = Self::new();
        result.errors.push(error.to_string());
        result
    }

    pub fn record_error(&mut self, context: impl Display, error: impl Display) {
        self.errors.push(format!("{}: {}", context, error));
    }

    pub fn push(&mut self, message: EmailMessage) {
        self.messages.push(message);
        self.filtered_count = self.messages.len();
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for CollectionResult {
    fn default() -> Self {
        Self::new()
    }
}
