//! IMAP authenticated with SASL XOAUTH2.
//!
//! Search, fetch and parsing are shared with [`ImapCollector`]; only the
//! login differs. Tokens come from a [`TokenManager`], so a valid cached
//! token is reused and the device-code flow runs only when silent
//! acquisition yields nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{DeviceCodePrompt, TokenManager, TokenManagerConfig};
use crate::error::Result;
use crate::model::{CollectOptions, CollectionResult, EmailFilter};
use crate::transport::Endpoint;

use super::imap::{validate_server, ImapCollector, DEFAULT_FOLDER};
use super::{Collector, CollectorKind, MessageStream};

/// Scope for Exchange Online IMAP access.
pub const OUTLOOK_IMAP_SCOPE: &str = "https://outlook.office365.com/IMAP.AccessAsUser.All";

/// Settings for an OAuth2 IMAP account. The defaults target Exchange Online.
#[derive(Debug, Clone)]
pub struct OAuth2ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub use_tls: bool,
    pub timeout: Duration,
    pub default_folder: String,
    pub token: TokenManagerConfig,
}

impl OAuth2ImapConfig {
    pub fn new(username: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: "outlook.office365.com".to_string(),
            port: 993,
            username: username.into(),
            use_tls: true,
            timeout: Duration::from_secs(30),
            default_folder: DEFAULT_FOLDER.to_string(),
            token: TokenManagerConfig::new(client_id, vec![OUTLOOK_IMAP_SCOPE.to_string()]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_server(&self.host, self.port, &self.username)?;
        self.token.validate()
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            timeout: self.timeout,
        }
    }
}

/// IMAP collector using bearer tokens instead of a password.
#[derive(Debug)]
pub struct OAuth2ImapCollector {
    inner: ImapCollector,
    tokens: Arc<TokenManager>,
}

impl OAuth2ImapCollector {
    pub fn new(config: OAuth2ImapConfig) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenManager::new(config.token.clone())?);
        Ok(Self::with_tokens(config, tokens))
    }

    /// Same as [`OAuth2ImapCollector::new`] with a custom device-code prompt.
    pub fn with_prompt(config: OAuth2ImapConfig, prompt: Box<dyn DeviceCodePrompt>) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenManager::with_prompt(config.token.clone(), prompt)?);
        Ok(Self::with_tokens(config, tokens))
    }

    fn with_tokens(config: OAuth2ImapConfig, tokens: Arc<TokenManager>) -> Self {
        let endpoint = config.endpoint();
        let inner = ImapCollector::with_token_manager(
            endpoint,
            config.username,
            config.default_folder,
            Arc::clone(&tokens),
        );
        Self { inner, tokens }
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Clears cached tokens; the next call re-authorizes.
    pub async fn revoke(&self) -> Result<()> {
        self.tokens.revoke().await
    }
}

#[async_trait]
impl Collector for OAuth2ImapCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::OAuth2Imap
    }

    async fn collect(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult {
        self.inner.collect(filter, options).await
    }

    fn collect_stream<'a>(
        &'a self,
        filter: &'a EmailFilter,
        options: &'a CollectOptions,
    ) -> MessageStream<'a> {
        self.inner.collect_stream(filter, options)
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        self.inner.list_folders().await
    }

    async fn test_connection(&self) -> bool {
        self.inner.test_connection().await
    }
}
