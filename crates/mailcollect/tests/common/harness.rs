//! Isolated environment for OAuth2 and Graph tests.
//!
//! Every harness owns a temp directory for token caches and saved mail, and
//! a `wiremock` server that stands in for both the identity platform and the
//! Graph API.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tempfile::TempDir;
use wiremock::MockServer;

use mailcollect::auth::{AccessTokenFile, DeviceCodePrompt, DeviceCodeResponse, TokenManagerConfig};
use mailcollect::collector::GraphConfig;

pub const TEST_TENANT: &str = "common";
pub const TEST_TOKEN: &str = "test-token";

pub struct TestHarness {
    temp_dir: TempDir,
    pub server: MockServer,
    pub output_dir: PathBuf,
}

impl TestHarness {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("mail");
        Self {
            temp_dir,
            server: MockServer::start().await,
            output_dir,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn cache_file(&self) -> PathBuf {
        self.temp_dir.path().join("token_cache.json")
    }

    pub fn token_file(&self) -> PathBuf {
        self.temp_dir.path().join("access_token.json")
    }

    /// Token endpoint path on the mock server.
    pub fn token_path(&self) -> String {
        format!("/{}/oauth2/v2.0/token", TEST_TENANT)
    }

    pub fn device_code_path(&self) -> String {
        format!("/{}/oauth2/v2.0/devicecode", TEST_TENANT)
    }

    /// Non-interactive settings pointing at the mock identity platform.
    pub fn token_config(&self) -> TokenManagerConfig {
        let mut config = TokenManagerConfig::new("test-client", vec!["Mail.Read".to_string()]);
        config.authority = self.server.uri();
        config.tenant_id = TEST_TENANT.to_string();
        config.cache_file = self.cache_file();
        config.token_file = Some(self.token_file());
        config.interactive = false;
        config
    }

    pub fn graph_config(&self, page_size: usize) -> GraphConfig {
        let mut config = GraphConfig::new("test-client");
        config.base_url = format!("{}/v1.0", self.server.uri());
        config.page_size = page_size;
        config.token = self.token_config();
        config
    }

    /// Writes a valid access-token file so no token request is made.
    pub async fn seed_access_token(&self) {
        AccessTokenFile::new(TEST_TOKEN, Utc::now() + Duration::hours(1))
            .save(&self.token_file())
            .await
            .expect("Failed to write access token file");
    }

    /// Writes a cache with one account whose access token has expired.
    pub fn seed_expired_cache(&self, refresh_token: &str) {
        let cache = serde_json::json!({
            "accounts": {
                "me@contoso.com": {
                    "username": "me@contoso.com",
                    "refresh_token": refresh_token,
                    "access_token": "stale",
                    "scopes": ["Mail.Read"],
                    "expires_at": "2020-01-01T00:00:00Z"
                }
            }
        });
        std::fs::write(self.cache_file(), cache.to_string()).expect("Failed to write cache");
    }

    pub fn read_cache(&self) -> String {
        std::fs::read_to_string(self.cache_file()).unwrap_or_default()
    }

    /// Graph path of a folder's message listing.
    pub fn messages_path(&self, folder: &str) -> String {
        format!("/v1.0/me/mailFolders/{}/messages", folder)
    }

    /// Absolute `@odata.nextLink` carrying `skiptoken`.
    pub fn next_link(&self, folder: &str, skiptoken: &str) -> String {
        format!(
            "{}{}?%24skiptoken={}",
            self.server.uri(),
            self.messages_path(folder),
            skiptoken
        )
    }
}

/// Records every user code it is shown.
#[derive(Debug, Clone, Default)]
pub struct RecordingPrompt {
    codes: Arc<Mutex<Vec<String>>>,
}

impl RecordingPrompt {
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }
}

impl DeviceCodePrompt for RecordingPrompt {
    fn show(&self, code: &DeviceCodeResponse) {
        self.codes.lock().unwrap().push(code.user_code.clone());
    }
}
