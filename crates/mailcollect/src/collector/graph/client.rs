//! Authenticated Microsoft Graph REST calls.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::TokenManager;
use crate::error::{MailError, Result};
use crate::paging::Page;
use crate::sanitize::redact_body;

use super::query::QueryPlan;
use super::types::{GraphMessage, MailFolder, ODataPage};

/// Wait used when a 429 response carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Thin REST client. Every request fetches a bearer token first, so an
/// expired token is refreshed transparently.
pub struct GraphClient {
    http: Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl GraphClient {
    pub fn new(base_url: &str, timeout: Duration, tokens: Arc<TokenManager>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            MailError::Configuration(format!("Invalid Graph base URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(MailError::Configuration(format!(
                "Graph base URL '{}' cannot carry a path",
                base_url
            )));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MailError::Configuration("Graph base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET with one transparent retry after a throttling response.
    async fn get(&self, url: &Url, query: &[(String, String)]) -> Result<Response> {
        let response = self.send(url, query).await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return check_status(response).await;
        }

        let wait = retry_after(&response);
        warn!("Graph throttled the request, retrying in {}s", wait);
        tokio::time::sleep(Duration::from_secs(wait)).await;

        let response = self.send(url, query).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(MailError::Throttled {
                retry_after: retry_after(&response),
            });
        }
        check_status(response).await
    }

    async fn send(&self, url: &Url, query: &[(String, String)]) -> Result<Response> {
        let token = self.tokens.get_access_token().await?;
        debug!("GET {}", url.path());
        Ok(self
            .http
            .get(url.clone())
            .query(query)
            .bearer_auth(token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url, query: &[(String, String)]) -> Result<T> {
        let response = self.get(url, query).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| MailError::Parse(format!("Unexpected Graph response: {}", e)))
    }

    /// One page of messages from `folder`.
    pub async fn list_messages(
        &self,
        folder: &str,
        plan: &QueryPlan,
        top: usize,
        skiptoken: Option<&str>,
    ) -> Result<Page<GraphMessage>> {
        let url = self.endpoint(&["me", "mailFolders", folder, "messages"])?;
        let page: ODataPage<GraphMessage> =
            self.get_json(&url, &plan.params(top, skiptoken)).await?;
        let next = page.next_link.as_deref().and_then(skiptoken_from);
        if page.next_link.is_some() && next.is_none() {
            warn!("Graph nextLink without a skiptoken, stopping pagination");
        }
        Ok(Page {
            items: page.value,
            next,
        })
    }

    /// Raw bytes of one attachment.
    pub async fn attachment_content(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["me", "messages", message_id, "attachments", attachment_id, "$value"])?;
        let response = self.get(&url, &[]).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// All mail folders, following `@odata.nextLink`.
    pub async fn mail_folders(&self) -> Result<Vec<MailFolder>> {
        let mut url = self.endpoint(&["me", "mailFolders"])?;
        let mut folders = Vec::new();
        loop {
            let page: ODataPage<MailFolder> = self.get_json(&url, &[]).await?;
            folders.extend(page.value);
            match page.next_link {
                Some(next) => {
                    url = Url::parse(&next)
                        .map_err(|e| MailError::Parse(format!("Invalid nextLink: {}", e)))?;
                }
                None => break,
            }
        }
        Ok(folders)
    }

    /// The signed-in user's profile.
    pub async fn me(&self) -> Result<serde_json::Value> {
        let url = self.endpoint(&["me"])?;
        self.get_json(&url, &[]).await
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(MailError::Authentication(format!(
            "Graph rejected the access token: {}",
            redact_body(&body)
        )));
    }
    Err(MailError::Protocol(format!(
        "Graph request failed ({}): {}",
        status,
        redact_body(&body)
    )))
}

fn retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Extracts the `$skiptoken` query value from an `@odata.nextLink`.
pub fn skiptoken_from(next_link: &str) -> Option<String> {
    let url = Url::parse(next_link).ok()?;
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case("$skiptoken") || key.eq_ignore_ascii_case("skiptoken"))
        .map(|(_, value)| value.into_owned())
}
