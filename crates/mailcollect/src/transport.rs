//! TCP/TLS connections for the session-based protocols (IMAP, POP3).

use std::fmt;
use std::net::TcpStream;
use std::time::Duration;

use async_io::Async;
use async_native_tls::TlsConnector;
use futures_util::io::{AsyncRead, AsyncWrite};
use log::{debug, info, warn};

use crate::error::{MailError, Result};

/// Byte stream carrying a protocol session.
pub trait MailStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> MailStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

/// Boxed stream so plain and TLS connections share one session type.
pub type BoxedStream = Box<dyn MailStream>;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens a TCP connection and, when requested, wraps it in TLS.
///
/// DNS resolution, TCP connect and the TLS handshake each run under the
/// endpoint timeout; expiry surfaces as [`MailError::Timeout`].
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedStream> {
    let addr = endpoint.address();
    info!("Connecting to {}", addr);

    let resolved = tokio::time::timeout(endpoint.timeout, tokio::net::lookup_host(&addr))
        .await
        .map_err(|_| MailError::Timeout(format!("resolving {}", addr)))?
        .map_err(|e| MailError::Connection(format!("cannot resolve {}: {}", addr, e)))?;

    let mut last_error = None;
    let mut tcp = None;
    for socket_addr in resolved {
        debug!("Trying {}", socket_addr);
        match tokio::time::timeout(endpoint.timeout, Async::<TcpStream>::connect(socket_addr)).await
        {
            Ok(Ok(stream)) => {
                tcp = Some(stream);
                break;
            }
            Ok(Err(e)) => last_error = Some(MailError::Connection(e.to_string())),
            Err(_) => last_error = Some(MailError::Timeout(format!("connecting to {}", addr))),
        }
    }

    let tcp = match tcp {
        Some(stream) => stream,
        None => {
            return Err(last_error
                .unwrap_or_else(|| MailError::Connection(format!("no address for {}", addr))))
        }
    };

    if !endpoint.use_tls {
        warn!("Connection to {} is not encrypted", addr);
        return Ok(Box::new(tcp));
    }

    let tls = tokio::time::timeout(
        endpoint.timeout,
        TlsConnector::new().connect(&endpoint.host, tcp),
    )
    .await
    .map_err(|_| MailError::Timeout(format!("TLS handshake with {}", addr)))??;

    Ok(Box::new(tls))
}
