use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// Per-call collection options.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Overrides the collector's default folder. Takes precedence over
    /// `EmailFilter::folder`.
    pub folder: Option<String>,
    /// Download attachment bodies where the backend fetches them separately
    /// (Graph). IMAP and POP3 always carry attachment content.
    pub include_attachments: bool,
    /// Persist collected messages after collection.
    pub output: Option<OutputOptions>,
}

impl CollectOptions {
    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = Some(output);
        self
    }
}

/// Serialization format for persisted messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
    Eml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "txt",
            OutputFormat::Eml => "eml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "txt" | "text" => Ok(OutputFormat::Text),
            "eml" => Ok(OutputFormat::Eml),
            _ => Err(MailError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = MailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(format: OutputFormat) -> Self {
        format.extension().to_string()
    }
}

fn default_create_subdirs() -> bool {
    true
}

/// Where and how to persist collected messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub save_attachments: bool,
    /// Defaults to `<output_dir>/attachments`.
    #[serde(default)]
    pub attachment_dir: Option<PathBuf>,
    /// Lay files out as `<date>/<sender-local-part>/`.
    #[serde(default = "default_create_subdirs")]
    pub create_subdirs: bool,
}

impl OutputOptions {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            save_attachments: false,
            attachment_dir: None,
            create_subdirs: true,
        }
    }

    pub fn attachment_dir(&self) -> PathBuf {
        self.attachment_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("attachments"))
    }
}
