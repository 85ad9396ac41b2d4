//! IMAP session wrapper used by the password and OAuth2 collectors.

use std::future::Future;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::{Fetch, Name};
use async_imap::Session;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{MailError, Result};
use crate::transport::{self, BoxedStream, Endpoint};

/// How to authenticate the session.
#[derive(Clone)]
pub enum ImapAuth {
    /// Plain `LOGIN`.
    Password(SecretString),
    /// SASL `XOAUTH2` with a bearer token.
    XOAuth2(SecretString),
}

impl std::fmt::Debug for ImapAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImapAuth::Password(_) => f.write_str("Password(****)"),
            ImapAuth::XOAuth2(_) => f.write_str("XOAuth2(****)"),
        }
    }
}

/// XOAUTH2 initial response. async-imap base64-encodes whatever
/// `process` returns, so the raw SASL string is handed over here.
struct XOAuth2Authenticator {
    response: String,
    sent: bool,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            // Error challenge after a rejected token: an empty reply lets the
            // server finish with NO.
            return String::new();
        }
        self.sent = true;
        std::mem::take(&mut self.response)
    }
}

/// Builds the SASL XOAUTH2 string `user=..^Aauth=Bearer ..^A^A`.
pub fn xoauth2_string(username: &str, access_token: &SecretString) -> String {
    format!(
        "user={}\x01auth=Bearer {}\x01\x01",
        username,
        access_token.expose_secret()
    )
}

/// One IMAP connection. Folders are opened read-only and messages fetched
/// with `BODY.PEEK[]`, so collecting never changes server state.
pub struct ImapClient {
    session: Option<Session<BoxedStream>>,
    endpoint: Endpoint,
    username: String,
    current_folder: Option<String>,
}

impl ImapClient {
    pub fn new(endpoint: Endpoint, username: impl Into<String>) -> Self {
        Self {
            session: None,
            endpoint,
            username: username.into(),
            current_folder: None,
        }
    }

    /// Connects to the server and authenticates.
    pub async fn connect(&mut self, auth: &ImapAuth) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        let stream = transport::connect(&self.endpoint).await?;
        self.connect_over(stream, auth).await
    }

    /// Reads the greeting on an open stream and authenticates.
    pub async fn connect_over(&mut self, stream: BoxedStream, auth: &ImapAuth) -> Result<()> {
        let mut client = async_imap::Client::new(stream);

        // The greeting must be consumed before AUTHENTICATE reads its continuation.
        with_timeout(self.endpoint.timeout, "greeting", async {
            match client.read_response().await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(MailError::Connection(
                    "server closed the connection before greeting".to_string(),
                )),
                Err(e) => Err(MailError::Connection(e.to_string())),
            }
        })
        .await?;

        let session = match auth {
            ImapAuth::Password(password) => {
                with_timeout(
                    self.endpoint.timeout,
                    "LOGIN",
                    async {
                        client
                            .login(&self.username, password.expose_secret())
                            .await
                            .map_err(|(e, _)| MailError::Authentication(e.to_string()))
                    },
                )
                .await?
            }
            ImapAuth::XOAuth2(token) => {
                let authenticator = XOAuth2Authenticator {
                    response: xoauth2_string(&self.username, token),
                    sent: false,
                };
                with_timeout(
                    self.endpoint.timeout,
                    "AUTHENTICATE XOAUTH2",
                    async {
                        client
                            .authenticate("XOAUTH2", authenticator)
                            .await
                            .map_err(|(e, _)| MailError::Authentication(e.to_string()))
                    },
                )
                .await?
            }
        };

        info!("Authenticated to IMAP server {}", self.endpoint.host);
        self.session = Some(session);
        Ok(())
    }

    fn session(&mut self) -> Result<&mut Session<BoxedStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| MailError::Connection("Not connected".to_string()))
    }

    /// Opens a folder read-only (`EXAMINE`) and returns its message count.
    pub async fn examine_folder(&mut self, folder: &str) -> Result<u32> {
        let timeout = self.endpoint.timeout;
        let session = self.session()?;
        info!("Examining folder: {}", folder);

        let mailbox = with_timeout(timeout, "EXAMINE", async {
            session.examine(folder).await.map_err(|e| match e {
                ImapError::No(_) => MailError::FolderNotFound(folder.to_string()),
                other => imap_error(other),
            })
        })
        .await?;

        self.current_folder = Some(folder.to_string());
        debug!("Folder '{}' holds {} messages", folder, mailbox.exists);
        Ok(mailbox.exists)
    }

    /// Runs `UID SEARCH` and returns matching UIDs in ascending order.
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<u32>> {
        let timeout = self.endpoint.timeout;
        let session = self.session()?;
        debug!("Searching with criteria: {}", criteria);

        let uids = with_timeout(timeout, "UID SEARCH", async {
            session
                .uid_search(criteria)
                .await
                .map_err(imap_error)
        })
        .await?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        debug!("Found {} messages matching search", uids.len());
        Ok(uids)
    }

    /// Fetches one full message without setting `\Seen`.
    pub async fn fetch_peek(&mut self, uid: u32) -> Result<Vec<u8>> {
        let timeout = self.endpoint.timeout;
        let session = self.session()?;
        debug!("Fetching message with UID {}", uid);

        let fetches: Vec<Fetch> = with_timeout(timeout, "UID FETCH", async {
            let stream = session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await
                .map_err(imap_error)?;
            let results: Vec<_> = stream.collect().await;
            results
                .into_iter()
                .collect::<std::result::Result<Vec<Fetch>, _>>()
                .map_err(imap_error)
        })
        .await?;

        let fetch = fetches
            .into_iter()
            .find(|f| f.body().is_some())
            .ok_or_else(|| MailError::Protocol(format!("Message with UID {} not found", uid)))?;

        fetch
            .body()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| MailError::Protocol(format!("Message {} has no body", uid)))
    }

    /// Lists every mailbox (`LIST "" "*"`).
    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        let timeout = self.endpoint.timeout;
        let session = self.session()?;

        let names: Vec<Name> = with_timeout(timeout, "LIST", async {
            let stream = session
                .list(Some(""), Some("*"))
                .await
                .map_err(imap_error)?;
            let results: Vec<_> = stream.collect().await;
            Ok(results
                .into_iter()
                .filter_map(|r| match r {
                    Ok(name) => Some(name),
                    Err(e) => {
                        warn!("Skipping unreadable LIST entry: {}", e);
                        None
                    }
                })
                .collect())
        })
        .await?;

        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    /// Closes the open folder and logs out. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let timeout = self.endpoint.timeout;
        let had_folder = self.current_folder.take().is_some();
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server {}", self.endpoint.host);
            if had_folder {
                if let Err(e) = with_timeout(timeout, "CLOSE", async {
                    session
                        .close()
                        .await
                        .map_err(imap_error)
                })
                .await
                {
                    warn!("IMAP CLOSE failed: {}", e);
                }
            }
            with_timeout(timeout, "LOGOUT", async {
                session
                    .logout()
                    .await
                    .map_err(imap_error)
            })
            .await?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapClient dropped without explicit disconnect - session will be closed");
        }
    }
}

/// Lost connections end the call; everything else is a per-command failure.
fn imap_error(err: ImapError) -> MailError {
    match err {
        ImapError::Io(e) => MailError::Connection(e.to_string()),
        ImapError::ConnectionLost => MailError::Connection("IMAP connection lost".to_string()),
        other => MailError::Protocol(other.to_string()),
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| MailError::Timeout(format!("IMAP {}", what)))?
}
