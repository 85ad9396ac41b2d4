//! Minimal POP3 client (RFC 1939): USER/PASS, STAT, RETR, QUIT.

use std::time::Duration;

use futures_util::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{MailError, Result};
use crate::transport::BoxedStream;

/// A POP3 session over any byte stream.
pub struct Pop3Client<S = BoxedStream> {
    stream: BufReader<S>,
    timeout: Duration,
    closed: bool,
}

impl<S> Pop3Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an open stream and consumes the server greeting.
    pub async fn start(stream: S, timeout: Duration) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            timeout,
            closed: false,
        };
        let greeting = client.read_status().await?;
        debug!("POP3 greeting: {}", greeting);
        Ok(client)
    }

    /// Authenticates with USER/PASS.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<()> {
        self.command(&format!("USER {}", username), "USER")
            .await
            .map_err(into_auth_error)?;
        self.command(&format!("PASS {}", password.expose_secret()), "PASS ****")
            .await
            .map_err(into_auth_error)?;
        Ok(())
    }

    /// Returns `(message count, mailbox size in octets)`.
    pub async fn stat(&mut self) -> Result<(usize, u64)> {
        let line = self.command("STAT", "STAT").await?;
        let mut parts = line.split_whitespace();
        let count = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| MailError::Protocol(format!("malformed STAT reply: {}", line)))?;
        let size = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((count, size))
    }

    /// Retrieves message `index` (1-based) with dot-stuffing removed.
    pub async fn retr(&mut self, index: usize) -> Result<Vec<u8>> {
        let command = format!("RETR {}", index);
        self.command(&command, &command).await?;
        self.read_multiline().await
    }

    /// Ends the session. Safe to call more than once.
    pub async fn quit(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.command("QUIT", "QUIT").await.map(|_| ())
    }

    /// Sends a command and returns the text after `+OK`.
    async fn command(&mut self, line: &str, log_as: &str) -> Result<String> {
        debug!("POP3 > {}", log_as);
        let payload = format!("{}\r\n", line);
        let writer = self.stream.get_mut();
        tokio::time::timeout(self.timeout, async {
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| MailError::Timeout(format!("POP3 {}", log_as)))?
        .map_err(|e| MailError::Connection(e.to_string()))?;

        self.read_status().await
    }

    async fn read_status(&mut self) -> Result<String> {
        let line = self.read_line().await?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if let Some(rest) = text.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else if let Some(rest) = text.strip_prefix("-ERR") {
            Err(MailError::Protocol(rest.trim().to_string()))
        } else {
            Err(MailError::Protocol(format!("unexpected reply: {}", text)))
        }
    }

    async fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line().await?;
            let trimmed = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n"));
            if trimmed == Some(b".") {
                break;
            }
            let unstuffed = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line[..]
            };
            body.extend_from_slice(unstuffed);
        }
        Ok(body)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let read = tokio::time::timeout(self.timeout, self.stream.read_until(b'\n', &mut line))
            .await
            .map_err(|_| MailError::Timeout("POP3 read".to_string()))?
            .map_err(|e| MailError::Connection(e.to_string()))?;
        if read == 0 {
            return Err(MailError::Connection(
                "POP3 server closed the connection".to_string(),
            ));
        }
        Ok(line)
    }
}

fn into_auth_error(err: MailError) -> MailError {
    match err {
        MailError::Protocol(reason) => MailError::Authentication(reason),
        other => other,
    }
}

impl<S> Drop for Pop3Client<S> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Pop3Client dropped without QUIT - connection will be closed");
        }
    }
}
