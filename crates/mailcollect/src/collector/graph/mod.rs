//! Exchange Online collector over the Microsoft Graph REST API.
//!
//! Messages are listed page by page (see [`crate::paging`]) and the next
//! page is requested only when the previous one is exhausted and
//! `max_results` has not been reached. Attachment metadata always comes
//! with the listing; attachment bytes are downloaded, one request each,
//! only when [`CollectOptions::include_attachments`] is set.

pub mod client;
pub mod query;
pub mod types;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use log::{info, warn};
use regex::Regex;
use tracing::{info_span, Instrument};

use crate::auth::{DeviceCodePrompt, TokenManager, TokenManagerConfig};
use crate::error::{MailError, Result};
use crate::model::{
    Attachment, CollectOptions, CollectionResult, EmailAddress, EmailFilter, EmailMessage,
    Priority, Status,
};
use crate::paging::paginate;

use super::{resolve_folder, Collector, CollectorKind, MessageStream};

pub use client::GraphClient;
pub use query::{QueryMode, QueryPlan};
pub use types::MailFolder;
use types::{GraphMessage, Recipient};

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_FOLDER: &str = "inbox";
/// Largest `$top` Graph accepts for messages.
pub const MAX_PAGE_SIZE: usize = 999;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Settings for a Graph mailbox.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub base_url: String,
    pub default_folder: String,
    pub page_size: usize,
    pub timeout: Duration,
    pub token: TokenManagerConfig,
}

impl GraphConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_folder: DEFAULT_FOLDER.to_string(),
            page_size: MAX_PAGE_SIZE,
            timeout: Duration::from_secs(30),
            token: TokenManagerConfig::new(
                client_id,
                vec!["Mail.Read".to_string(), "Mail.ReadWrite".to_string()],
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(MailError::Configuration(format!(
                "Graph page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        self.token.validate()
    }
}

/// Collects mail through Microsoft Graph.
#[derive(Debug)]
pub struct GraphCollector {
    client: GraphClient,
    tokens: Arc<TokenManager>,
    default_folder: String,
    page_size: usize,
}

impl GraphCollector {
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenManager::new(config.token.clone())?);
        Self::with_tokens(config, tokens)
    }

    pub fn with_prompt(config: GraphConfig, prompt: Box<dyn DeviceCodePrompt>) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenManager::with_prompt(config.token.clone(), prompt)?);
        Self::with_tokens(config, tokens)
    }

    fn with_tokens(config: GraphConfig, tokens: Arc<TokenManager>) -> Result<Self> {
        let client = GraphClient::new(&config.base_url, config.timeout, Arc::clone(&tokens))?;
        Ok(Self {
            client,
            tokens,
            default_folder: config.default_folder,
            page_size: config.page_size,
        })
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn revoke(&self) -> Result<()> {
        self.tokens.revoke().await
    }

    /// Folder ids and display names.
    pub async fn mail_folders(&self) -> Result<Vec<MailFolder>> {
        self.client.mail_folders().await
    }

    /// Lazily paged raw messages. Each page asks for `$top` = what is left
    /// of `max_results` after `delivered` messages, capped at the page size.
    fn pages<'a>(
        &'a self,
        folder: String,
        plan: QueryPlan,
        max_results: Option<usize>,
        delivered: Arc<AtomicUsize>,
    ) -> BoxStream<'a, Result<GraphMessage>> {
        let page_size = self.page_size;
        let plan = Arc::new(plan);
        let folder = Arc::new(folder);
        paginate(move |skiptoken: Option<String>| {
            let top = max_results.map_or(page_size, |max| {
                max.saturating_sub(delivered.load(Ordering::Relaxed))
                    .clamp(1, page_size)
            });
            let plan = Arc::clone(&plan);
            let folder = Arc::clone(&folder);
            async move {
                self.client
                    .list_messages(&folder, &plan, top, skiptoken.as_deref())
                    .await
            }
        })
    }

    /// Downloads attachment bytes in place. Failures are returned per
    /// attachment; the remaining ones are still fetched.
    async fn fetch_attachments(
        &self,
        message: &mut EmailMessage,
        attachment_ids: &[String],
    ) -> Vec<(String, MailError)> {
        let mut failures = Vec::new();
        for (attachment, attachment_id) in message.attachments.iter_mut().zip(attachment_ids) {
            match self.client.attachment_content(&message.id, attachment_id).await {
                Ok(content) => {
                    if attachment.size_bytes == 0 {
                        attachment.size_bytes = content.len() as u64;
                    }
                    attachment.content = content;
                }
                Err(e) => failures.push((attachment.filename.clone(), e)),
            }
        }
        failures
    }
}

/// Converts a Graph message into the normalized form. Returns the Graph
/// attachment ids alongside, in attachment order.
pub fn normalize(message: GraphMessage, collected_at: chrono::DateTime<chrono::Utc>) -> (EmailMessage, Vec<String>) {
    let importance = message.importance.clone().unwrap_or_else(|| "normal".to_string());
    let subject = message.subject.clone().unwrap_or_default();

    let (body_text, body_html) = match message.body {
        Some(body) if body.content_type.eq_ignore_ascii_case("html") => {
            let text = HTML_TAG.replace_all(&body.content, "").into_owned();
            (Some(text), Some(body.content))
        }
        Some(body) => (Some(body.content), None),
        None => (None, None),
    };

    let status = if message.is_draft.unwrap_or(false) {
        Status::Draft
    } else if message
        .flag
        .as_ref()
        .is_some_and(|f| f.flag_status.eq_ignore_ascii_case("flagged"))
    {
        Status::Flagged
    } else if message.is_read.unwrap_or(false) {
        Status::Read
    } else {
        Status::Unread
    };

    let mut headers = std::collections::HashMap::new();
    if let Some(id) = &message.internet_message_id {
        headers.insert("Message-ID".to_string(), id.clone());
    }
    headers.insert("Subject".to_string(), subject.clone());
    headers.insert("X-Priority".to_string(), importance.clone());

    let attachment_ids = message.attachments.iter().map(|a| a.id.clone()).collect();
    let attachments = message
        .attachments
        .into_iter()
        .map(|a| Attachment {
            filename: a.name.unwrap_or_else(|| "unknown".to_string()),
            content_type: a
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: a.size,
            content: Vec::new(),
            content_id: a.content_id,
        })
        .collect();

    let normalized = EmailMessage {
        id: message.id,
        subject,
        sender: message.from.map(address).unwrap_or_default(),
        recipients: message.to_recipients.into_iter().map(address).collect(),
        cc: message.cc_recipients.into_iter().map(address).collect(),
        bcc: message.bcc_recipients.into_iter().map(address).collect(),
        timestamp: message.received_date_time.unwrap_or(collected_at),
        body_text,
        body_html,
        attachments,
        priority: match importance.to_ascii_lowercase().as_str() {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        },
        status,
        headers,
        source_folder: message.parent_folder_id,
    };
    (normalized, attachment_ids)
}

fn address(recipient: Recipient) -> EmailAddress {
    EmailAddress::new(
        recipient.email_address.address.unwrap_or_default(),
        recipient.email_address.name,
    )
}

struct StreamState<'a> {
    pages: BoxStream<'a, Result<GraphMessage>>,
    residual: EmailFilter,
    remaining: Option<usize>,
    delivered: Arc<AtomicUsize>,
    include_attachments: bool,
}

#[async_trait]
impl Collector for GraphCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Graph
    }

    async fn collect(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult {
        let folder = resolve_folder(filter, options, &self.default_folder);
        let span = info_span!("collect", backend = "graph", folder = %folder);
        async move {
            let mut result = CollectionResult::new();
            let plan = QueryPlan::from_filter(filter);
            let residual = plan.residual.clone();
            let delivered = Arc::new(AtomicUsize::new(0));
            let mut pages = self.pages(folder, plan, filter.max_results, Arc::clone(&delivered));
            let mut walked = 0usize;

            loop {
                if filter.max_results.is_some_and(|max| result.messages.len() >= max) {
                    break;
                }
                let Some(item) = pages.next().await else {
                    break;
                };
                let raw = match item {
                    Ok(raw) => raw,
                    Err(e) if e.is_fatal() => {
                        warn!("Graph collection aborted: {}", e);
                        result.record_error("Connection error", e);
                        break;
                    }
                    Err(e) => {
                        warn!("Graph page request failed: {}", e);
                        result.record_error("Failed to list messages", e);
                        break;
                    }
                };
                walked += 1;

                let (mut message, attachment_ids) = normalize(raw, result.collected_at);
                if !residual.matches(&message) {
                    continue;
                }
                if options.include_attachments {
                    for (name, e) in self.fetch_attachments(&mut message, &attachment_ids).await {
                        result.record_error(
                            format!("Failed to fetch attachment '{}' of message {}", name, message.id),
                            e,
                        );
                    }
                }
                result.push(message);
                delivered.store(result.messages.len(), Ordering::Relaxed);
            }

            result.total_count = walked;
            info!(
                "Graph collection finished: {} messages ({} walked)",
                result.filtered_count, walked
            );
            result
        }
        .instrument(span)
        .await
    }

    fn collect_stream<'a>(
        &'a self,
        filter: &'a EmailFilter,
        options: &'a CollectOptions,
    ) -> MessageStream<'a> {
        let folder = resolve_folder(filter, options, &self.default_folder);
        let plan = QueryPlan::from_filter(filter);
        let delivered = Arc::new(AtomicUsize::new(0));
        let state = StreamState {
            residual: plan.residual.clone(),
            pages: self.pages(folder, plan, filter.max_results, Arc::clone(&delivered)),
            remaining: filter.max_results,
            delivered,
            include_attachments: options.include_attachments,
        };

        Box::pin(stream::unfold(state, move |mut state| async move {
            if state.remaining == Some(0) {
                return None;
            }
            loop {
                let raw = match state.pages.next().await? {
                    Ok(raw) => raw,
                    Err(e) => return Some((Err(e), state)),
                };
                let (mut message, attachment_ids) = normalize(raw, chrono::Utc::now());
                if !state.residual.matches(&message) {
                    continue;
                }
                if state.include_attachments {
                    for (name, e) in self.fetch_attachments(&mut message, &attachment_ids).await {
                        warn!("Failed to fetch attachment '{}' of message {}: {}", name, message.id, e);
                    }
                }
                state.remaining = state.remaining.map(|r| r - 1);
                state.delivered.fetch_add(1, Ordering::Relaxed);
                return Some((Ok(message), state));
            }
        }))
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(self
            .client
            .mail_folders()
            .await?
            .into_iter()
            .map(|f| f.display_name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn test_connection(&self) -> bool {
        match self.client.me().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Graph connection test failed: {}", e);
                false
            }
        }
    }
}
