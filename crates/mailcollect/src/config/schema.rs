//! On-disk configuration layout (JSON, camelCase).
//!
//! ```json
//! {
//!   "version": "1",
//!   "source": { "type": "imap", "host": "imap.example.com", "username": "me",
//!               "passwordEnvVar": "IMAP_PASSWORD" },
//!   "filter": { "subjectContains": "invoice", "maxResults": 50 },
//!   "output": { "outputDir": "./mail", "format": "json" },
//!   "logging": { "format": "pretty", "level": "info" }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::model::{EmailFilter, OutputOptions};

pub const CONFIG_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    pub source: SourceSettings,
    #[serde(default)]
    pub filter: EmailFilter,
    #[serde(default)]
    pub output: Option<OutputOptions>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which backend to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceSettings {
    #[serde(rename = "imap")]
    Imap(ImapSettings),
    #[serde(rename = "pop3")]
    Pop3(Pop3Settings),
    #[serde(rename = "oauth2Imap")]
    OAuth2Imap(OAuth2ImapSettings),
    #[serde(rename = "graph")]
    Graph(GraphSettings),
}

impl SourceSettings {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceSettings::Imap(_) => "imap",
            SourceSettings::Pop3(_) => "pop3",
            SourceSettings::OAuth2Imap(_) => "oauth2Imap",
            SourceSettings::Graph(_) => "graph",
        }
    }
}

/// Password given directly, by file, or by environment variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSource {
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub password_env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapSettings {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(flatten)]
    pub password: PasswordSource,
    #[serde(default)]
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pop3Settings {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(flatten)]
    pub password: PasswordSource,
    #[serde(default)]
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// OAuth2 application registration and token cache locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_secret_env_var: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub token_cache_file: Option<String>,
    #[serde(default)]
    pub access_token_file: Option<String>,
    #[serde(default)]
    pub interactive: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2ImapSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(flatten)]
    pub oauth: OAuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub oauth: OAuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
