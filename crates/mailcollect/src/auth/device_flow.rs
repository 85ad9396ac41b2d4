//! OAuth2 Device Authorization Grant (RFC 8628) against the Microsoft
//! identity platform.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{MailError, Result};
use crate::sanitize::redact_body;

/// Scope that makes the provider issue refresh tokens.
pub const OFFLINE_ACCESS: &str = "offline_access";

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Floor for the polling deadline when the provider sends a tiny `expires_in`.
const MIN_POLL_TTL_SECS: u64 = 5;
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    /// Code the user types at `verification_uri`.
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Lifetime in seconds of the device code.
    pub expires_in: u64,
    /// Minimum polling interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Provider-formatted instructions, when sent.
    #[serde(default)]
    pub message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Talks to the device-code and token endpoints of one tenant.
pub struct DeviceFlowClient {
    http: Client,
    client_id: String,
    client_secret: Option<SecretString>,
    device_code_url: String,
    token_url: String,
}

impl DeviceFlowClient {
    /// Endpoints are `{authority}/{tenant}/oauth2/v2.0/{devicecode,token}`.
    pub fn new(
        authority: &str,
        tenant: &str,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
    ) -> Result<Self> {
        let base = format!("{}/{}/oauth2/v2.0", authority.trim_end_matches('/'), tenant);
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MailError::OAuth2(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            client_id: client_id.into(),
            client_secret,
            device_code_url: format!("{}/devicecode", base),
            token_url: format!("{}/token", base),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn device_code_url(&self) -> &str {
        &self.device_code_url
    }

    /// Starts a device authorization for `scopes` (plus `offline_access`).
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeResponse> {
        let scope = scope_param(scopes);
        info!(
            "Requesting device code from {} for scopes: {}",
            self.device_code_url, scope
        );

        let params = [("client_id", self.client_id.as_str()), ("scope", &scope)];
        let response = self
            .http
            .post(&self.device_code_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailError::OAuth2(format!("Failed to request device code: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::OAuth2(format!(
                "Device code request failed ({}): {}",
                status,
                redact_body(&body)
            )));
        }

        let code: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| MailError::OAuth2(format!("Failed to parse device code: {}", e)))?;
        debug!("Device code issued, expires in {}s", code.expires_in);
        Ok(code)
    }

    /// Polls the token endpoint until the user authorizes, denies or the
    /// device code expires.
    pub async fn poll_for_token(&self, code: &DeviceCodeResponse) -> Result<TokenResponse> {
        let ttl_secs = code.expires_in.max(MIN_POLL_TTL_SECS);
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        let mut interval = Duration::from_secs(code.interval).max(MIN_POLL_INTERVAL);

        info!("Polling for token authorization (expires in {}s)", ttl_secs);

        loop {
            if Instant::now() > deadline {
                return Err(MailError::OAuth2(
                    "Device code expired before authorization".to_string(),
                ));
            }

            tokio::time::sleep(interval).await;

            let mut params = vec![
                ("client_id", self.client_id.clone()),
                ("device_code", code.device_code.clone()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE.to_string()),
            ];
            self.push_secret(&mut params);

            let response = self
                .http
                .post(&self.token_url)
                .form(&params)
                .send()
                .await
                .map_err(|e| MailError::OAuth2(format!("Token request failed: {}", e)))?;

            if response.status().is_success() {
                let token: TokenResponse = response.json().await.map_err(|e| {
                    MailError::OAuth2(format!("Failed to parse token response: {}", e))
                })?;
                info!("Device authorization completed");
                return Ok(token);
            }

            let body = response.text().await.unwrap_or_default();
            let error: TokenErrorResponse = serde_json::from_str(&body).map_err(|_| {
                MailError::OAuth2(format!("Unexpected token response: {}", redact_body(&body)))
            })?;

            match error.error.as_str() {
                "authorization_pending" => {
                    debug!("Authorization pending, continuing to poll");
                }
                "slow_down" => {
                    interval = (interval + Duration::from_secs(5)).min(MAX_POLL_INTERVAL);
                    warn!("Server requested slow down, new interval: {:?}", interval);
                }
                "expired_token" => {
                    return Err(MailError::OAuth2(
                        "Device code expired before authorization".to_string(),
                    ));
                }
                "access_denied" => {
                    return Err(MailError::OAuth2(
                        "User denied the authorization request".to_string(),
                    ));
                }
                other => {
                    return Err(MailError::OAuth2(format!(
                        "Token request error: {} - {}",
                        other,
                        redact_body(&error.error_description.unwrap_or_default())
                    )));
                }
            }
        }
    }

    /// Exchanges a refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &SecretString,
        scopes: &[String],
    ) -> Result<TokenResponse> {
        info!("Refreshing access token");

        let mut params = vec![
            ("client_id", self.client_id.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().to_string()),
            ("scope", scope_param(scopes)),
        ];
        self.push_secret(&mut params);

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailError::OAuth2(format!("Token refresh failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::OAuth2(format!(
                "Token refresh failed ({}): {}",
                status,
                redact_body(&body)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::OAuth2(format!("Failed to parse refresh response: {}", e)))?;
        info!("Successfully refreshed access token");
        Ok(token)
    }

    fn push_secret(&self, params: &mut Vec<(&'static str, String)>) {
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.expose_secret().to_string()));
        }
    }
}

/// Joins scopes with spaces, appending `offline_access` when missing.
pub fn scope_param(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    if !all.contains(&OFFLINE_ACCESS) {
        all.push(OFFLINE_ACCESS);
    }
    all.join(" ")
}
