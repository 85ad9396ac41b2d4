//! IMAP collector.
//!
//! The filter is translated into a `UID SEARCH` (see [`build_search_criteria`]);
//! matching messages are fetched one at a time with `BODY.PEEK[]` in
//! ascending UID order, truncated to `max_results` after the search.
//! Status is always reported as unread.

pub mod client;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream;
use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info_span, Instrument};

use crate::auth::TokenManager;
use crate::error::{MailError, Result};
use crate::model::{CollectOptions, CollectionResult, EmailFilter, EmailMessage};
use crate::parser::EmailParser;
use crate::transport::{self, BoxedStream, Endpoint};

use super::{resolve_folder, Collector, CollectorKind, IdGuard, MessageStream};

pub use client::{ImapAuth, ImapClient};
pub use search::build_search_criteria;

/// Default mailbox when neither the call nor the filter names one.
pub const DEFAULT_FOLDER: &str = "INBOX";

/// Connection settings for a password-authenticated IMAP account.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub use_tls: bool,
    pub timeout: Duration,
    pub default_folder: String,
}

impl ImapConfig {
    /// IMAPS on port 993, 30 second timeout, `INBOX`.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            password,
            use_tls: true,
            timeout: Duration::from_secs(30),
            default_folder: DEFAULT_FOLDER.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_server(&self.host, self.port, &self.username)?;
        if self.password.expose_secret().is_empty() {
            return Err(MailError::Configuration("IMAP password is required".into()));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            timeout: self.timeout,
        }
    }
}

pub(crate) fn validate_server(host: &str, port: u16, username: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(MailError::Configuration("IMAP host is required".into()));
    }
    if username.trim().is_empty() {
        return Err(MailError::Configuration("IMAP username is required".into()));
    }
    if port == 0 {
        return Err(MailError::Configuration("IMAP port must be non-zero".into()));
    }
    Ok(())
}

/// Where the session credential comes from.
#[derive(Clone)]
pub(crate) enum Credentials {
    Password(SecretString),
    OAuth2(Arc<TokenManager>),
}

/// Collects mail from an IMAP server.
pub struct ImapCollector {
    endpoint: Endpoint,
    username: String,
    default_folder: String,
    credentials: Credentials,
    kind: CollectorKind,
}

impl std::fmt::Debug for ImapCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapCollector")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("default_folder", &self.default_folder)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ImapCollector {
    /// Validates the configuration; missing credentials fail here rather
    /// than on first use.
    pub fn new(config: ImapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            endpoint: config.endpoint(),
            username: config.username,
            default_folder: config.default_folder,
            credentials: Credentials::Password(config.password),
            kind: CollectorKind::Imap,
        })
    }

    /// IMAP session authenticated with XOAUTH2 tokens from `tokens`.
    pub(crate) fn with_token_manager(
        endpoint: Endpoint,
        username: String,
        default_folder: String,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            endpoint,
            username,
            default_folder,
            credentials: Credentials::OAuth2(tokens),
            kind: CollectorKind::OAuth2Imap,
        }
    }

    async fn auth(&self) -> Result<ImapAuth> {
        match &self.credentials {
            Credentials::Password(password) => Ok(ImapAuth::Password(password.clone())),
            Credentials::OAuth2(tokens) => Ok(ImapAuth::XOAuth2(tokens.get_access_token().await?)),
        }
    }

    /// Connects and authenticates a fresh session. The credential is
    /// resolved before the socket is opened.
    async fn open(&self) -> Result<ImapClient> {
        let auth = self.auth().await?;
        let stream = transport::connect(&self.endpoint).await?;
        self.login(stream, &auth).await
    }

    async fn login(&self, stream: BoxedStream, auth: &ImapAuth) -> Result<ImapClient> {
        let mut client = ImapClient::new(self.endpoint.clone(), self.username.clone());
        client.connect_over(stream, auth).await?;
        Ok(client)
    }

    /// Runs one collection over an authenticated session and logs out
    /// whatever the outcome.
    async fn collect_session(
        &self,
        mut client: ImapClient,
        folder: &str,
        filter: &EmailFilter,
        result: &mut CollectionResult,
    ) {
        let parser = EmailParser::new(result.collected_at).with_folder(folder);
        let outcome = fetch_into(&mut client, folder, filter, &parser, result).await;
        release(&mut client).await;
        if let Err(e) = outcome {
            warn!("IMAP collection aborted: {}", e);
            result.record_error("Connection error", e);
        }
    }

    /// Streams the selection over the session produced by `open`.
    fn session_stream<'a>(
        &'a self,
        open: BoxFuture<'a, Result<ImapClient>>,
        folder: String,
        filter: &'a EmailFilter,
    ) -> MessageStream<'a> {
        let messages = stream::unfold(StreamState::Open(open), move |state| {
            let folder = folder.clone();
            async move {
                match state {
                    StreamState::Open(open) => {
                        let mut client = match open.await {
                            Ok(client) => client,
                            Err(e) => return Some((Err(e), StreamState::Done)),
                        };
                        match search_folder(&mut client, &folder, filter).await {
                            Ok((uids, _)) => {
                                let mut state = StreamState::Fetching {
                                    client,
                                    uids: uids.into_iter(),
                                    parser: EmailParser::new(chrono::Utc::now())
                                        .with_folder(folder),
                                    ids: IdGuard::default(),
                                };
                                next_message(&mut state).await.map(|item| (item, state))
                            }
                            Err(e) => {
                                release(&mut client).await;
                                Some((Err(e), StreamState::Done))
                            }
                        }
                    }
                    mut state @ StreamState::Fetching { .. } => {
                        next_message(&mut state).await.map(|item| (item, state))
                    }
                    StreamState::Done => None,
                }
            }
        });
        Box::pin(messages)
    }
}

/// Searches `folder`, then fetches and parses each hit into `result`.
///
/// Per-message fetch and parse failures are recorded and skipped;
/// connection failures abort.
async fn fetch_into(
    client: &mut ImapClient,
    folder: &str,
    filter: &EmailFilter,
    parser: &EmailParser,
    result: &mut CollectionResult,
) -> Result<()> {
    let (uids, total) = search_folder(client, folder, filter).await?;
    result.total_count = total;

    let mut ids = IdGuard::default();
    for uid in uids {
        let raw = match client.fetch_peek(uid).await {
            Ok(raw) => raw,
            Err(e) if !e.is_fatal() => {
                result.record_error(format!("Failed to fetch UID {}", uid), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        match parser.parse(&raw, &fallback_id(uid)) {
            Ok(mut message) => {
                ids.claim(&mut message, || fallback_id(uid));
                result.push(message);
            }
            Err(e) => result.record_error(format!("Failed to parse UID {}", uid), e),
        }
    }

    Ok(())
}

async fn search_folder(
    client: &mut ImapClient,
    folder: &str,
    filter: &EmailFilter,
) -> Result<(Vec<u32>, usize)> {
    client.examine_folder(folder).await?;
    let criteria = build_search_criteria(filter);
    let mut uids = client.search(&criteria).await?;
    let total = uids.len();
    if let Some(max) = filter.max_results {
        uids.truncate(max);
    }
    info!(
        "IMAP search in '{}' matched {} messages, fetching {}",
        folder,
        total,
        uids.len()
    );
    Ok((uids, total))
}

async fn release(client: &mut ImapClient) {
    if let Err(e) = client.disconnect().await {
        warn!("IMAP logout failed: {}", e);
    }
}

fn fallback_id(uid: u32) -> String {
    format!("imap-uid-{}", uid)
}

enum StreamState<'a> {
    Open(BoxFuture<'a, Result<ImapClient>>),
    Fetching {
        client: ImapClient,
        uids: std::vec::IntoIter<u32>,
        parser: EmailParser,
        ids: IdGuard,
    },
    Done,
}

#[async_trait]
impl Collector for ImapCollector {
    fn kind(&self) -> CollectorKind {
        self.kind
    }

    async fn collect(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult {
        let folder = resolve_folder(filter, options, &self.default_folder);
        let span = info_span!(
            "collect",
            backend = %self.kind,
            host = %self.endpoint.host,
            folder = %folder
        );
        async move {
            let mut result = CollectionResult::new();
            match self.open().await {
                Ok(client) => {
                    self.collect_session(client, &folder, filter, &mut result)
                        .await
                }
                Err(e) => {
                    warn!("IMAP connection failed: {}", e);
                    result.record_error("Connection error", e);
                    return result;
                }
            }

            info!(
                "IMAP collection finished: {} of {} messages",
                result.filtered_count, result.total_count
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
        self.session_stream(Box::pin(self.open()), folder, filter)
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        let mut client = self.open().await?;
        let folders = client.list_folders().await;
        release(&mut client).await;
        folders
    }

    async fn test_connection(&self) -> bool {
        match self.open().await {
            Ok(mut client) => {
                release(&mut client).await;
                true
            }
            Err(e) => {
                warn!(
                    "IMAP connection test failed for {}: {}",
                    self.endpoint.host, e
                );
                false
            }
        }
    }
}

/// Fetches the next UID of a streaming session. Returns `None` (after
/// logging out) once the UIDs are exhausted; a fatal error moves the state
/// to `Done`.
async fn next_message(state: &mut StreamState<'_>) -> Option<Result<EmailMessage>> {
    let StreamState::Fetching {
        client,
        uids,
        parser,
        ids,
    } = state
    else {
        return None;
    };

    let Some(uid) = uids.next() else {
        release(client).await;
        *state = StreamState::Done;
        return None;
    };

    match client.fetch_peek(uid).await {
        Ok(raw) => Some(parser.parse(&raw, &fallback_id(uid)).map(|mut message| {
            ids.claim(&mut message, || fallback_id(uid));
            message
        })),
        Err(e) if !e.is_fatal() => Some(Err(e)),
        Err(e) => {
            release(client).await;
            *state = StreamState::Done;
            Some(Err(e))
        }
    }
}
