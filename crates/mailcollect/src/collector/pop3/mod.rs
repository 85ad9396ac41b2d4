//! POP3 collector.
//!
//! POP3 has no server-side search and no folders, so every predicate of the
//! filter is evaluated client-side after parsing. `max_results` caps the
//! scan window (the first N messages of the mailbox), not the number of
//! matches: a restrictive filter can return fewer than N messages even when
//! later messages would match.

pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::io::{AsyncRead, AsyncWrite};
use futures_util::stream;
use log::{info, warn};
use secrecy::SecretString;
use tracing::{info_span, Instrument};

use crate::error::{MailError, Result};
use crate::model::{CollectOptions, CollectionResult, EmailFilter};
use crate::parser::EmailParser;
use crate::transport::{self, Endpoint};

use super::{Collector, CollectorKind, IdGuard, MessageStream};

pub use client::Pop3Client;

/// POP3 exposes a single mailbox.
pub const POP3_FOLDER: &str = "INBOX";

/// Connection settings for a POP3 account.
#[derive(Debug, Clone)]
pub struct Pop3Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub use_tls: bool,
    pub timeout: Duration,
}

impl Pop3Config {
    /// POP3S on port 995 with a 30 second timeout.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port: 995,
            username: username.into(),
            password,
            use_tls: true,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<()> {
        use secrecy::ExposeSecret;

        if self.host.trim().is_empty() {
            return Err(MailError::Configuration("POP3 host is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(MailError::Configuration("POP3 username is required".into()));
        }
        if self.password.expose_secret().is_empty() {
            return Err(MailError::Configuration("POP3 password is required".into()));
        }
        if self.port == 0 {
            return Err(MailError::Configuration("POP3 port must be non-zero".into()));
        }
        Ok(())
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            timeout: self.timeout,
        }
    }
}

/// Collects mail from a POP3 mailbox.
#[derive(Debug)]
pub struct Pop3Collector {
    config: Pop3Config,
}

impl Pop3Collector {
    /// Validates the configuration; missing credentials fail here rather
    /// than on first use.
    pub fn new(config: Pop3Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Pop3Config {
        &self.config
    }

    async fn open(&self) -> Result<Pop3Client> {
        let stream = transport::connect(&self.config.endpoint()).await?;
        let mut client = Pop3Client::start(stream, self.config.timeout).await?;
        if let Err(e) = client
            .login(&self.config.username, &self.config.password)
            .await
        {
            let _ = client.quit().await;
            return Err(e);
        }
        info!("Logged in to POP3 server {}", self.config.host);
        Ok(client)
    }

    /// Opens a session and reads the mailbox size.
    async fn open_counted(&self) -> Result<(Pop3Client, usize)> {
        let mut client = self.open().await?;
        match client.stat().await {
            Ok((count, _)) => Ok((client, count)),
            Err(e) => {
                let _ = client.quit().await;
                Err(e)
            }
        }
    }
}

/// Scans the first `max_results` messages and keeps those matching `filter`.
///
/// Per-message retrieval and parse failures are recorded and skipped;
/// transport failures abort the scan.
pub(crate) async fn scan_mailbox<S>(
    client: &mut Pop3Client<S>,
    parser: &EmailParser,
    filter: &EmailFilter,
    result: &mut CollectionResult,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (count, _) = client.stat().await?;
    result.total_count = count;
    let window = scan_window(count, filter);
    info!("POP3 mailbox holds {} messages, scanning {}", count, window);

    let mut ids = IdGuard::default();
    for index in 1..=window {
        let raw = match client.retr(index).await {
            Ok(raw) => raw,
            Err(e) if !e.is_fatal() => {
                result.record_error(format!("Failed to retrieve message {}", index), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        match parser.parse(&raw, &fallback_id(index)) {
            Ok(mut message) if filter.matches(&message) => {
                ids.claim(&mut message, || fallback_id(index));
                result.push(message);
            }
            Ok(_) => {}
            Err(e) => result.record_error(format!("Failed to parse message {}", index), e),
        }
    }

    Ok(())
}

fn scan_window(count: usize, filter: &EmailFilter) -> usize {
    filter.max_results.map_or(count, |max| max.min(count))
}

fn fallback_id(index: usize) -> String {
    format!("pop3-{}", index)
}

enum StreamState {
    Connect,
    Scanning {
        client: Pop3Client,
        parser: EmailParser,
        ids: IdGuard,
        next: usize,
        window: usize,
    },
    Done,
}

#[async_trait]
impl Collector for Pop3Collector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Pop3
    }

    async fn collect(&self, filter: &EmailFilter, _options: &CollectOptions) -> CollectionResult {
        let span = info_span!("collect", backend = "pop3", host = %self.config.host);
        async move {
            let mut result = CollectionResult::new();
            let parser = EmailParser::new(result.collected_at).with_folder(POP3_FOLDER);

            let mut client = match self.open().await {
                Ok(client) => client,
                Err(e) => {
                    warn!("POP3 connection failed: {}", e);
                    result.record_error("Connection error", e);
                    return result;
                }
            };

            let outcome = scan_mailbox(&mut client, &parser, filter, &mut result).await;
            if let Err(e) = client.quit().await {
                warn!("POP3 QUIT failed: {}", e);
            }
            if let Err(e) = outcome {
                warn!("POP3 collection aborted: {}", e);
                result.record_error("Connection error", e);
            }

            info!(
                "POP3 collection finished: {} of {} messages kept",
                result.filtered_count, result.total_count
            );
            result
        }
        .instrument(span)
        .await
    }

    fn collect_stream<'a>(
        &'a self,
        filter: &'a EmailFilter,
        _options: &'a CollectOptions,
    ) -> MessageStream<'a> {
        let messages = stream::unfold(StreamState::Connect, move |mut state| async move {
            loop {
                match state {
                    StreamState::Connect => {
                        match self.open_counted().await {
                            Ok((client, count)) => {
                                state = StreamState::Scanning {
                                    client,
                                    parser: EmailParser::new(chrono::Utc::now())
                                        .with_folder(POP3_FOLDER),
                                    ids: IdGuard::default(),
                                    next: 1,
                                    window: scan_window(count, filter),
                                };
                            }
                            Err(e) => return Some((Err(e), StreamState::Done)),
                        }
                    }
                    StreamState::Scanning {
                        mut client,
                        parser,
                        mut ids,
                        next,
                        window,
                    } => {
                        if next > window {
                            if let Err(e) = client.quit().await {
                                warn!("POP3 QUIT failed: {}", e);
                            }
                            return None;
                        }

                        let raw = match client.retr(next).await {
                            Ok(raw) => raw,
                            Err(e) if e.is_fatal() => return Some((Err(e), StreamState::Done)),
                            Err(e) => {
                                let state = StreamState::Scanning {
                                    client,
                                    parser,
                                    ids,
                                    next: next + 1,
                                    window,
                                };
                                return Some((Err(e), state));
                            }
                        };

                        let parsed = parser.parse(&raw, &fallback_id(next));
                        let parsed = match parsed {
                            Ok(mut message) if filter.matches(&message) => {
                                ids.claim(&mut message, || fallback_id(next));
                                Ok(Some(message))
                            }
                            Ok(_) => Ok(None),
                            Err(e) => Err(e),
                        };
                        state = StreamState::Scanning {
                            client,
                            parser,
                            ids,
                            next: next + 1,
                            window,
                        };
                        match parsed {
                            Ok(Some(message)) => return Some((Ok(message), state)),
                            Ok(None) => continue,
                            Err(e) => return Some((Err(e), state)),
                        }
                    }
                    StreamState::Done => return None,
                }
            }
        });
        Box::pin(messages)
    }

    async fn list_folders(&self) -> Result<Vec<String>> {
        Ok(vec![POP3_FOLDER.to_string()])
    }

    async fn test_connection(&self) -> bool {
        match self.open().await {
            Ok(mut client) => {
                if let Err(e) = client.quit().await {
                    warn!("POP3 QUIT failed: {}", e);
                }
                true
            }
            Err(e) => {
                warn!("POP3 connection test failed for {}: {}", self.config.host, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedStream;
    use chrono::Utc;

    fn message(subject: &str, from: &str) -> String {
        format!(
            "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\nDate: Fri, 15 Mar 2024 10:30:00 +0000\r\nMessage-ID: <{id}@example.com>\r\n\r\nBody of {subject}\r\n.\r\n",
            subject = subject,
            id = subject.replace(' ', "-"),
            from = from,
        )
    }

    fn transcript(messages: &[String], retrieved: usize) -> String {
        let mut server = format!("+OK ready\r\n+OK {} 1000\r\n", messages.len());
        for msg in messages.iter().take(retrieved) {
            server.push_str("+OK\r\n");
            server.push_str(msg);
        }
        server
    }

    #[test]
    fn test_config_validation() {
        let config = Pop3Config::new("pop.example.com", "", SecretString::from("pw"));
        assert!(matches!(
            Pop3Collector::new(config).unwrap_err(),
            MailError::Configuration(_)
        ));

        let config = Pop3Config::new("pop.example.com", "me", SecretString::from(""));
        assert!(Pop3Collector::new(config).is_err());

        let config = Pop3Config::new("pop.example.com", "me", SecretString::from("pw"));
        assert_eq!(Pop3Collector::new(config).unwrap().config().port, 995);
    }

    #[tokio::test]
    async fn test_scan_applies_filter_client_side() {
        let messages = vec![
            message("Urgent Meeting", "boss@corp.example"),
            message("Lunch", "friend@example.com"),
            message("Urgent Invoice", "billing@vendor.example"),
        ];
        let stream = ScriptedStream::new(&transcript(&messages, 3));
        let mut client = Pop3Client::start(stream.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        let filter = EmailFilter {
            subject_contains: Some("urgent".into()),
            ..Default::default()
        };
        let mut result = CollectionResult::new();
        let parser = EmailParser::new(Utc::now()).with_folder(POP3_FOLDER);
        scan_mailbox(&mut client, &parser, &filter, &mut result)
            .await
            .unwrap();

        assert_eq!(result.total_count, 3);
        assert_eq!(result.filtered_count, 2);
        assert!(result.errors.is_empty());
        assert!(result.messages.iter().all(|m| m.subject.starts_with("Urgent")));
        assert_eq!(result.messages[0].source_folder.as_deref(), Some("INBOX"));
        assert!(stream.written_text().contains("RETR 3\r\n"));
    }

    #[tokio::test]
    async fn test_max_results_caps_scan_window_before_filtering() {
        let messages = vec![
            message("Lunch", "friend@example.com"),
            message("Lunch again", "friend@example.com"),
            message("Urgent Meeting", "boss@corp.example"),
        ];
        let stream = ScriptedStream::new(&transcript(&messages, 2));
        let mut client = Pop3Client::start(stream.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        let filter = EmailFilter {
            subject_contains: Some("urgent".into()),
            max_results: Some(2),
            ..Default::default()
        };
        let mut result = CollectionResult::new();
        let parser = EmailParser::new(Utc::now());
        scan_mailbox(&mut client, &parser, &filter, &mut result)
            .await
            .unwrap();

        assert_eq!(result.total_count, 3);
        assert_eq!(result.filtered_count, 0);
        assert!(!stream.written_text().contains("RETR 3"));
    }

    #[tokio::test]
    async fn test_failed_retrieval_is_recorded_and_skipped() {
        let ok = message("Hello", "a@example.com");
        let server = format!("+OK ready\r\n+OK 2 100\r\n-ERR no such message\r\n+OK\r\n{}", ok);
        let mut client = Pop3Client::start(ScriptedStream::new(&server), Duration::from_secs(5))
            .await
            .unwrap();

        let mut result = CollectionResult::new();
        let parser = EmailParser::new(Utc::now());
        scan_mailbox(&mut client, &parser, &EmailFilter::default(), &mut result)
            .await
            .unwrap();

        assert_eq!(result.filtered_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("message 1"));
    }

    #[tokio::test]
    async fn test_repeated_message_id_falls_back_to_index() {
        let copy = "From: a@example.com\r\nSubject: Copy\r\nMessage-ID: <same@example.com>\r\n\r\nbody\r\n.\r\n";
        let messages = vec![copy.to_string(), copy.to_string()];
        let stream = ScriptedStream::new(&transcript(&messages, 2));
        let mut client = Pop3Client::start(stream, Duration::from_secs(5))
            .await
            .unwrap();

        let mut result = CollectionResult::new();
        let parser = EmailParser::new(Utc::now());
        scan_mailbox(&mut client, &parser, &EmailFilter::default(), &mut result)
            .await
            .unwrap();

        let ids: Vec<&str> = result.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["<same@example.com>", "pop3-2"]);
    }

    #[tokio::test]
    async fn test_list_folders_is_inbox_only() {
        let config = Pop3Config::new("pop.example.com", "me", SecretString::from("pw"));
        let collector = Pop3Collector::new(config).unwrap();
        assert_eq!(collector.list_folders().await.unwrap(), vec!["INBOX"]);
    }
}
