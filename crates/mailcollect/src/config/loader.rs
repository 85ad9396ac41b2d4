use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::auth::TokenManagerConfig;
use crate::collector::{
    Collector, GraphCollector, GraphConfig, ImapCollector, ImapConfig, OAuth2ImapCollector,
    OAuth2ImapConfig, Pop3Collector, Pop3Config,
};
use crate::error::{MailError, Result};
use crate::secrets::{expand_home, has_secret_source, resolve_secret, resolve_secret_optional};

use super::schema::{
    Config, GraphSettings, ImapSettings, OAuth2ImapSettings, OAuthSettings, PasswordSource,
    Pop3Settings, SourceSettings, CONFIG_VERSION,
};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        MailError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(content)
        .map_err(|e| MailError::Configuration(format!("Invalid configuration: {}", e)))?;
    validate_config(&config)?;
    debug!("Loaded {} source configuration", config.source.type_name());
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.version != CONFIG_VERSION {
        return Err(MailError::Configuration(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if let (Some(from), Some(to)) = (config.filter.date_from, config.filter.date_to) {
        if from > to {
            return Err(MailError::Configuration(
                "filter.dateFrom must not be after filter.dateTo".into(),
            ));
        }
    }

    let password = match &config.source {
        SourceSettings::Imap(s) => Some(&s.password),
        SourceSettings::Pop3(s) => Some(&s.password),
        _ => None,
    };
    if let Some(source) = password {
        if !has_secret_source(
            source.password.as_deref(),
            source.password_file.as_deref(),
            source.password_env_var.as_deref(),
        ) {
            return Err(MailError::Configuration(format!(
                "{} source needs one of password, passwordFile or passwordEnvVar",
                config.source.type_name()
            )));
        }
    }

    if let Some(output) = &config.output {
        if output.output_dir.as_os_str().is_empty() {
            return Err(MailError::Configuration("output.outputDir is required".into()));
        }
    }

    Ok(())
}

/// Resolves secrets and constructs the collector for `settings`.
pub fn build_collector(settings: &SourceSettings) -> Result<Box<dyn Collector>> {
    Ok(match settings {
        SourceSettings::Imap(s) => Box::new(ImapCollector::new(imap_config(s)?)?),
        SourceSettings::Pop3(s) => Box::new(Pop3Collector::new(pop3_config(s)?)?),
        SourceSettings::OAuth2Imap(s) => {
            Box::new(OAuth2ImapCollector::new(oauth2_imap_config(s)?)?)
        }
        SourceSettings::Graph(s) => Box::new(GraphCollector::new(graph_config(s)?)?),
    })
}

fn password(source: &PasswordSource) -> Result<secrecy::SecretString> {
    Ok(resolve_secret(
        source.password.as_deref(),
        source.password_file.as_deref(),
        source.password_env_var.as_deref(),
    )?)
}

pub fn imap_config(s: &ImapSettings) -> Result<ImapConfig> {
    let mut config = ImapConfig::new(&s.host, &s.username, password(&s.password)?);
    if let Some(port) = s.port {
        config.port = port;
    }
    if let Some(use_tls) = s.use_tls {
        config.use_tls = use_tls;
    }
    if let Some(secs) = s.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(folder) = &s.folder {
        config.default_folder = folder.clone();
    }
    Ok(config)
}

pub fn pop3_config(s: &Pop3Settings) -> Result<Pop3Config> {
    let mut config = Pop3Config::new(&s.host, &s.username, password(&s.password)?);
    if let Some(port) = s.port {
        config.port = port;
    }
    if let Some(use_tls) = s.use_tls {
        config.use_tls = use_tls;
    }
    if let Some(secs) = s.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

fn apply_oauth(token: &mut TokenManagerConfig, s: &OAuthSettings) -> Result<()> {
    token.client_secret = resolve_secret_optional(
        s.client_secret.as_deref(),
        s.client_secret_file.as_deref(),
        s.client_secret_env_var.as_deref(),
    )?;
    if let Some(tenant) = &s.tenant_id {
        token.tenant_id = tenant.clone();
    }
    if let Some(authority) = &s.authority {
        token.authority = authority.clone();
    }
    if let Some(scopes) = &s.scopes {
        token.scopes = scopes.clone();
    }
    if let Some(path) = &s.token_cache_file {
        token.cache_file = expand_home(path);
    }
    if let Some(path) = &s.access_token_file {
        token.token_file = Some(expand_home(path));
    }
    if let Some(interactive) = s.interactive {
        token.interactive = interactive;
    }
    Ok(())
}

pub fn oauth2_imap_config(s: &OAuth2ImapSettings) -> Result<OAuth2ImapConfig> {
    let mut config = OAuth2ImapConfig::new(&s.username, &s.oauth.client_id);
    if let Some(host) = &s.host {
        config.host = host.clone();
    }
    if let Some(port) = s.port {
        config.port = port;
    }
    if let Some(use_tls) = s.use_tls {
        config.use_tls = use_tls;
    }
    if let Some(secs) = s.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(folder) = &s.folder {
        config.default_folder = folder.clone();
    }
    apply_oauth(&mut config.token, &s.oauth)?;
    Ok(config)
}

pub fn graph_config(s: &GraphSettings) -> Result<GraphConfig> {
    let mut config = GraphConfig::new(&s.oauth.client_id);
    if let Some(url) = &s.base_url {
        config.base_url = url.clone();
    }
    if let Some(folder) = &s.folder {
        config.default_folder = folder.clone();
    }
    if let Some(size) = s.page_size {
        config.page_size = size;
    }
    if let Some(secs) = s.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    apply_oauth(&mut config.token, &s.oauth)?;
    Ok(config)
}
