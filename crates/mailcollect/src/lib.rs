pub mod auth;
pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod paging;
pub mod parser;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod transport;

pub use auth::{TokenManager, TokenManagerConfig, TokenState};
pub use client::MailCollector;
pub use collector::{
    Collector, CollectorKind, GraphCollector, GraphConfig, ImapCollector, ImapConfig,
    MessageStream, OAuth2ImapCollector, OAuth2ImapConfig, Pop3Collector, Pop3Config,
};
pub use config::{build_collector, load_config, Config, SourceSettings};
pub use error::{ErrorKind, MailError, Result};
pub use logging::{init_logging, LogFormat};
pub use model::{
    Attachment, CollectOptions, CollectionResult, EmailAddress, EmailFilter, EmailMessage,
    OutputFormat, OutputOptions, Priority, Status,
};
pub use parser::EmailParser;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::MessageStore;
