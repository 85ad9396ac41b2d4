//! Facade over one collector, adding optional persistence.

use log::{info, warn};

use crate::collector::{Collector, CollectorKind, MessageStream};
use crate::config::{build_collector, SourceSettings};
use crate::error::Result;
use crate::model::{CollectOptions, CollectionResult, EmailFilter};
use crate::storage::MessageStore;

/// Uniform entry point for any backend.
///
/// The `*_blocking` variants drive the async operation on a private
/// current-thread runtime. They must not be called from inside an async
/// context.
pub struct MailCollector {
    collector: Box<dyn Collector>,
}

impl std::fmt::Debug for MailCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCollector")
            .field("kind", &self.collector.kind())
            .finish()
    }
}

impl MailCollector {
    pub fn new(collector: Box<dyn Collector>) -> Self {
        Self { collector }
    }

    /// Builds the collector described by a loaded configuration.
    pub fn from_settings(settings: &SourceSettings) -> Result<Self> {
        Ok(Self::new(build_collector(settings)?))
    }

    pub fn kind(&self) -> CollectorKind {
        self.collector.kind()
    }

    pub fn collector(&self) -> &dyn Collector {
        self.collector.as_ref()
    }

    /// Collects, then persists when `options.output` is set. Save failures
    /// are appended to the result's errors.
    pub async fn collect(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult {
        info!("Collecting mail via {}", self.collector.kind());
        let mut result = self.collector.collect(filter, options).await;

        if let Some(output) = &options.output {
            if result.messages.is_empty() {
                info!("Nothing to save");
            } else {
                MessageStore::new(output.clone()).save_all(&mut result);
            }
        }

        if !result.errors.is_empty() {
            warn!("Collection finished with {} errors", result.errors.len());
        }
        result
    }

    pub fn collect_stream<'a>(
        &'a self,
        filter: &'a EmailFilter,
        options: &'a CollectOptions,
    ) -> MessageStream<'a> {
        self.collector.collect_stream(filter, options)
    }

    pub async fn list_folders(&self) -> Result<Vec<String>> {
        self.collector.list_folders().await
    }

    pub async fn test_connection(&self) -> bool {
        self.collector.test_connection().await
    }

    pub fn collect_blocking(&self, filter: &EmailFilter, options: &CollectOptions) -> CollectionResult {
        match runtime() {
            Ok(rt) => rt.block_on(self.collect(filter, options)),
            Err(e) => CollectionResult::failed(format!("Connection error: {}", e)),
        }
    }

    pub fn list_folders_blocking(&self) -> Result<Vec<String>> {
        runtime()?.block_on(self.list_folders())
    }

    pub fn test_connection_blocking(&self) -> bool {
        match runtime() {
            Ok(rt) => rt.block_on(self.test_connection()),
            Err(e) => {
                warn!("Failed to start runtime for connection test: {}", e);
                false
            }
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Pop3Collector, Pop3Config};
    use secrecy::SecretString;

    fn unreachable_collector() -> MailCollector {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Pop3Config::new("127.0.0.1", "me", SecretString::from("pw"));
        config.port = port;
        config.use_tls = false;
        MailCollector::new(Box::new(Pop3Collector::new(config).unwrap()))
    }

    #[test]
    fn test_blocking_variants_report_failures() {
        let collector = unreachable_collector();
        assert_eq!(collector.kind(), CollectorKind::Pop3);

        let result = collector.collect_blocking(&EmailFilter::default(), &CollectOptions::default());
        assert!(result.messages.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(!collector.test_connection_blocking());
        assert_eq!(collector.list_folders_blocking().unwrap(), vec!["INBOX"]);
    }
}
