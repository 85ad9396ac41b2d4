//! Configuration files and collector construction.

pub mod loader;
pub mod schema;

pub use loader::{build_collector, load_config, load_config_from_str};
pub use schema::{
    Config, GraphSettings, ImapSettings, LoggingSettings, OAuth2ImapSettings, OAuthSettings,
    PasswordSource, Pop3Settings, SourceSettings,
};
