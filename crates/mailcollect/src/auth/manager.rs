//! Access-token lifecycle for the OAuth2 backends.
//!
//! ```text
//! NoToken ──first use──▶ Authenticating ──ok──▶ Cached
//!    ▲                        │                   │ expiry passes
//!    └────────failure─────────┘                   ▼
//!                         Authenticating ◀──── Expired
//! ```
//!
//! Acquisition order: in-memory token, access-token file, persistent cache
//! (valid access token, else refresh token), and finally the interactive
//! device-code flow.

use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::error::{MailError, Result};
use crate::sanitize::redact_path;

use super::cache::{remove_file, AccessTokenFile, TokenCache};
use super::device_flow::{DeviceCodeResponse, DeviceFlowClient, TokenResponse};

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TENANT: &str = "common";
pub const DEFAULT_CACHE_FILE: &str = "token_cache.json";
pub const DEFAULT_TOKEN_FILE: &str = "access_token.json";
/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Cached,
    Expired,
    Authenticating,
}

/// Presents the verification URL and user code to whoever must sign in.
pub trait DeviceCodePrompt: Send + Sync {
    fn show(&self, code: &DeviceCodeResponse);
}

/// Logs the instructions and prints them to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompt;

impl DeviceCodePrompt for ConsolePrompt {
    fn show(&self, code: &DeviceCodeResponse) {
        info!(
            "Device authorization required: visit {} and enter code {}",
            code.verification_uri, code.user_code
        );
        match &code.message {
            Some(message) => eprintln!("{}", message),
            None => eprintln!(
                "To sign in, open {} and enter the code {}",
                code.verification_uri, code.user_code
            ),
        }
    }
}

/// OAuth2 application and cache settings.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub client_id: String,
    /// Only for confidential clients.
    pub client_secret: Option<SecretString>,
    pub tenant_id: String,
    pub authority: String,
    pub scopes: Vec<String>,
    pub cache_file: PathBuf,
    pub token_file: Option<PathBuf>,
    /// When false a missing token fails instead of starting the device flow.
    pub interactive: bool,
    pub default_expires_in: u64,
}

impl TokenManagerConfig {
    pub fn new(client_id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            scopes,
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            token_file: Some(PathBuf::from(DEFAULT_TOKEN_FILE)),
            interactive: true,
            default_expires_in: DEFAULT_EXPIRES_IN_SECS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(MailError::Configuration("OAuth2 client id is required".into()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(MailError::Configuration("OAuth2 tenant id is required".into()));
        }
        if self.scopes.is_empty() {
            return Err(MailError::Configuration(
                "At least one OAuth2 scope is required".into(),
            ));
        }
        url::Url::parse(&self.authority).map_err(|e| {
            MailError::Configuration(format!("Invalid authority '{}': {}", self.authority, e))
        })?;
        Ok(())
    }
}

#[derive(Clone)]
struct MemoryToken {
    secret: SecretString,
    expires_at: DateTime<Utc>,
}

/// Hands out bearer tokens, refreshing or re-authorizing as needed.
///
/// Concurrent callers are serialized so at most one refresh or device flow
/// runs at a time.
pub struct TokenManager {
    config: TokenManagerConfig,
    flow: DeviceFlowClient,
    prompt: Box<dyn DeviceCodePrompt>,
    token: Mutex<Option<MemoryToken>>,
    state: StdMutex<TokenState>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl TokenManager {
    pub fn new(config: TokenManagerConfig) -> Result<Self> {
        Self::with_prompt(config, Box::new(ConsolePrompt))
    }

    pub fn with_prompt(
        config: TokenManagerConfig,
        prompt: Box<dyn DeviceCodePrompt>,
    ) -> Result<Self> {
        config.validate()?;
        let flow = DeviceFlowClient::new(
            &config.authority,
            &config.tenant_id,
            config.client_id.clone(),
            config.client_secret.clone(),
        )?;
        Ok(Self {
            config,
            flow,
            prompt,
            token: Mutex::new(None),
            state: StdMutex::new(TokenState::NoToken),
        })
    }

    pub fn config(&self) -> &TokenManagerConfig {
        &self.config
    }

    /// Current state. A cached token whose expiry has passed reads as
    /// [`TokenState::Expired`].
    pub fn state(&self) -> TokenState {
        let state = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state != TokenState::Cached {
            return state;
        }
        match self.token.try_lock() {
            Ok(token) => match token.as_ref() {
                Some(t) if t.expires_at <= Utc::now() => TokenState::Expired,
                _ => state,
            },
            Err(_) => state,
        }
    }

    fn set_state(&self, state: TokenState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Returns a bearer token valid at the time of the call.
    pub async fn get_access_token(&self) -> Result<SecretString> {
        let mut memory = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = memory.as_ref() {
            if token.expires_at > now {
                return Ok(token.secret.clone());
            }
            info!("Cached access token expired at {}", token.expires_at);
            self.set_state(TokenState::Expired);
        }

        if let Some(path) = &self.config.token_file {
            if let Some(file) = AccessTokenFile::load(path).await {
                if file.is_valid(now) {
                    info!("Using access token from {}", redact_path(path));
                    let token = MemoryToken {
                        secret: SecretString::from(file.access_token),
                        expires_at: file.expires_at,
                    };
                    let secret = token.secret.clone();
                    *memory = Some(token);
                    self.set_state(TokenState::Cached);
                    return Ok(secret);
                }
            }
        }

        self.set_state(TokenState::Authenticating);
        match self.acquire().await {
            Ok(token) => {
                let secret = token.secret.clone();
                *memory = Some(token);
                self.set_state(TokenState::Cached);
                Ok(secret)
            }
            Err(e) => {
                *memory = None;
                self.set_state(TokenState::NoToken);
                warn!("Token acquisition failed: {}", e);
                Err(e)
            }
        }
    }

    /// Silent acquisition first, device flow last. Both caches are written
    /// back on success.
    async fn acquire(&self) -> Result<MemoryToken> {
        let mut cache = TokenCache::load(&self.config.cache_file).await;
        let now = Utc::now();

        let account_key = cache.first_account().map(|(key, _)| key.to_string());
        let mut silent = None;

        if let Some(key) = account_key.as_deref() {
            if let Some(account) = cache.account(key) {
                if let Some((token, expires_at)) = account.valid_access_token(now) {
                    info!("Using cached access token for account {}", key);
                    silent = Some(MemoryToken {
                        secret: SecretString::from(token.to_string()),
                        expires_at,
                    });
                } else if let Some(refresh) = account.refresh_token.clone() {
                    match self
                        .flow
                        .refresh_access_token(&SecretString::from(refresh), &self.config.scopes)
                        .await
                    {
                        Ok(response) => {
                            let token = self.record(&mut cache, Some(key), &response);
                            silent = Some(token);
                        }
                        Err(e) => warn!("Silent refresh for account {} failed: {}", key, e),
                    }
                }
            }
        }

        let token = match silent {
            Some(token) => token,
            None if self.config.interactive => {
                let code = self.flow.request_device_code(&self.config.scopes).await?;
                self.prompt.show(&code);
                let response = self.flow.poll_for_token(&code).await?;
                self.record(&mut cache, account_key.as_deref(), &response)
            }
            None => {
                return Err(MailError::OAuth2(
                    "No cached token available and interactive authentication is disabled"
                        .to_string(),
                ))
            }
        };

        if let Err(e) = cache.save_if_changed(&self.config.cache_file).await {
            warn!("Failed to persist token cache: {}", e);
        }
        if let Some(path) = &self.config.token_file {
            let file = AccessTokenFile::new(token.secret.expose_secret(), token.expires_at);
            if let Err(e) = file.save(path).await {
                warn!("Failed to persist access token: {}", e);
            }
        }

        Ok(token)
    }

    fn record(
        &self,
        cache: &mut TokenCache,
        account: Option<&str>,
        response: &TokenResponse,
    ) -> MemoryToken {
        let lifetime = response.expires_in.unwrap_or(self.config.default_expires_in);
        let expires_at = Utc::now() + ChronoDuration::seconds(lifetime as i64);
        cache.store(account, response, &self.config.scopes, expires_at);
        MemoryToken {
            secret: SecretString::from(response.access_token.clone()),
            expires_at,
        }
    }

    /// Signs out: clears memory and deletes both cache files.
    pub async fn revoke(&self) -> Result<()> {
        let mut memory = self.token.lock().await;
        *memory = None;
        self.set_state(TokenState::NoToken);

        remove_file(&self.config.cache_file).await?;
        if let Some(path) = &self.config.token_file {
            remove_file(path).await?;
        }
        info!("OAuth2 tokens revoked");
        Ok(())
    }
}
