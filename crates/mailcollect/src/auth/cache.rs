//! On-disk token caches.
//!
//! Two files are kept: the persistent [`TokenCache`] holding per-account
//! refresh and access tokens, and the small [`AccessTokenFile`] with just
//! the latest access token and its expiry.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sanitize::redact_path;

use super::device_flow::TokenResponse;

/// Account key used when the provider sends no `id_token`.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Tokens for one signed-in account.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedAccount {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CachedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedAccount")
            .field("username", &self.username)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_access_token", &self.access_token.is_some())
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedAccount {
    /// The cached access token, if it has not expired at `now`.
    pub fn valid_access_token(&self, now: DateTime<Utc>) -> Option<(&str, DateTime<Utc>)> {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) if expires_at > now => Some((token.as_str(), expires_at)),
            _ => None,
        }
    }
}

/// Persistent token cache. Serialized as JSON; only written back when
/// something changed since it was loaded.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    accounts: BTreeMap<String, CachedAccount>,
    #[serde(skip)]
    state_changed: bool,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache, returning an empty one when the file is missing or
    /// unreadable.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::deserialize_from(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable token cache {}: {}", redact_path(path), e);
                Self::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(),
            Err(e) => {
                warn!("Failed to read token cache {}: {}", redact_path(path), e);
                Self::new()
            }
        }
    }

    pub fn deserialize_from(content: &str) -> Result<Self> {
        let mut cache: TokenCache = serde_json::from_str(content)?;
        cache.state_changed = false;
        Ok(cache)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the cache if it changed. Returns whether a write happened.
    pub async fn save_if_changed(&mut self, path: &Path) -> Result<bool> {
        if !self.state_changed {
            return Ok(false);
        }
        write_file(path, &self.to_json()?).await?;
        self.state_changed = false;
        debug!("Token cache written to {}", redact_path(path));
        Ok(true)
    }

    pub fn has_state_changed(&self) -> bool {
        self.state_changed
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// First account, in key order.
    pub fn first_account(&self) -> Option<(&str, &CachedAccount)> {
        self.accounts.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    pub fn account(&self, key: &str) -> Option<&CachedAccount> {
        self.accounts.get(key)
    }

    /// Records a token response under `preferred_account` (or the account
    /// named in the `id_token`). Returns the account key.
    pub fn store(
        &mut self,
        preferred_account: Option<&str>,
        token: &TokenResponse,
        scopes: &[String],
        expires_at: DateTime<Utc>,
    ) -> String {
        let username = token.id_token.as_deref().and_then(account_from_id_token);
        let key = username
            .clone()
            .or_else(|| preferred_account.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());

        let previous = self.accounts.get(&key).cloned().unwrap_or_default();
        let updated = CachedAccount {
            username: username.or(previous.username),
            // Providers do not always rotate refresh tokens.
            refresh_token: token.refresh_token.clone().or(previous.refresh_token),
            access_token: Some(token.access_token.clone()),
            scopes: token
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| scopes.to_vec()),
            expires_at: Some(expires_at),
        };

        let changed = self.accounts.get(&key) != Some(&updated);
        self.accounts.insert(key.clone(), updated);
        self.state_changed |= changed;
        key
    }
}

/// Reads `preferred_username` from the payload of an unverified JWT.
pub fn account_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("preferred_username")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// `{ access_token, expires_at, saved_at }` with RFC 3339 timestamps.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessTokenFile {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessTokenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenFile")
            .field("access_token", &"****")
            .field("expires_at", &self.expires_at)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

impl AccessTokenFile {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            saved_at: Utc::now(),
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at > now
    }

    /// Missing or malformed files read as `None`.
    pub async fn load(path: &Path) -> Option<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read access token file {}: {}", redact_path(path), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Ignoring malformed access token file {}: {}", redact_path(path), e);
                None
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        write_file(path, &serde_json::to_string_pretty(self)?).await
    }
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Removes a cache file; a missing file is not an error.
pub(crate) async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
