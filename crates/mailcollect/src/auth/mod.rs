//! OAuth2 credentials for the OAuth2 IMAP and Graph backends.

pub mod cache;
pub mod device_flow;
pub mod manager;

pub use cache::{AccessTokenFile, CachedAccount, TokenCache};
pub use device_flow::{DeviceCodeResponse, DeviceFlowClient, TokenResponse};
pub use manager::{
    ConsolePrompt, DeviceCodePrompt, TokenManager, TokenManagerConfig, TokenState,
};
