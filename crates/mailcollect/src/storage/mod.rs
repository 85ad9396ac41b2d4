//! Persistence of collected messages and their attachments.
//!
//! File names follow `{YYYYMMDD_HHMMSS}_{shortId}_{subject}.{ext}`; with
//! `create_subdirs` they land under `{YYYY-MM-DD}/{sender-local-part}/`.
//! Files are created with `create_new`, so an existing file is never
//! overwritten; collisions get a `_2`, `_3`, ... suffix.

pub mod format;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{MailError, Result};
use crate::model::{CollectionResult, EmailMessage, OutputFormat, OutputOptions};
use crate::sanitize::{sanitize_component, sanitize_filename, sanitize_subject, short_message_id};

pub use format::EML_ATTACHMENT_PLACEHOLDER;

/// Upper bound on collision suffixes tried before giving up.
const MAX_COLLISION_ATTEMPTS: usize = 1000;

/// Writes messages according to [`OutputOptions`].
#[derive(Debug, Clone)]
pub struct MessageStore {
    options: OutputOptions,
}

impl MessageStore {
    pub fn new(options: OutputOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    /// Directory a message is written to.
    pub fn message_dir(&self, message: &EmailMessage) -> PathBuf {
        if !self.options.create_subdirs {
            return self.options.output_dir.clone();
        }
        self.options
            .output_dir
            .join(message.timestamp.format("%Y-%m-%d").to_string())
            .join(sanitize_component(message.sender.local_part()))
    }

    /// Saves one message in the configured format.
    pub fn save_message(&self, message: &EmailMessage) -> Result<PathBuf> {
        self.save_message_as(message, self.options.format)
    }

    /// Saves one message in a format given by name (`json`, `txt`, `eml`).
    /// Unknown names fail with [`MailError::UnsupportedFormat`].
    pub fn save_as(&self, message: &EmailMessage, format: &str) -> Result<PathBuf> {
        let format: OutputFormat = format.parse()?;
        self.save_message_as(message, format)
    }

    fn save_message_as(&self, message: &EmailMessage, format: OutputFormat) -> Result<PathBuf> {
        let content = match format {
            OutputFormat::Json => format::render_json(message)?,
            OutputFormat::Text => format::render_text(message),
            OutputFormat::Eml => format::render_eml(message),
        };
        let dir = self.message_dir(message);
        let path = create_unique(&dir, &file_name(message, format), content.as_bytes())?;
        debug!("Saved message {} to {}", message.id, path.display());
        Ok(path)
    }

    /// Writes attachments that carry content to the attachment directory.
    /// Metadata-only attachments are skipped.
    pub fn save_attachments(&self, message: &EmailMessage) -> Vec<Result<PathBuf>> {
        let dir = self.options.attachment_dir();
        message
            .attachments
            .iter()
            .filter(|a| a.has_content())
            .map(|a| create_unique(&dir, &sanitize_filename(&a.filename), &a.content))
            .collect()
    }

    /// Saves every message of `result`, recording written paths in
    /// `saved_files` and failures in `errors`. One failing message does not
    /// stop the others.
    pub fn save_all(&self, result: &mut CollectionResult) {
        let mut saved = Vec::new();
        let mut errors = Vec::new();

        for message in &result.messages {
            match self.save_message(message) {
                Ok(path) => saved.push(path),
                Err(e) => {
                    warn!("Failed to save message {}: {}", message.id, e);
                    errors.push(format!("Failed to save email {}: {}", message.id, e));
                    continue;
                }
            }

            if self.options.save_attachments {
                for (attachment, outcome) in message
                    .attachments
                    .iter()
                    .filter(|a| a.has_content())
                    .zip(self.save_attachments(message))
                {
                    match outcome {
                        Ok(path) => saved.push(path),
                        Err(e) => errors.push(format!(
                            "Failed to save attachment {} of email {}: {}",
                            attachment.filename, message.id, e
                        )),
                    }
                }
            }
        }

        info!(
            "Saved {} files to {} ({} failures)",
            saved.len(),
            self.options.output_dir.display(),
            errors.len()
        );
        result.saved_files.extend(saved);
        result.errors.extend(errors);
    }
}

/// `{YYYYMMDD_HHMMSS}_{shortId}_{subject}.{ext}`
pub fn file_name(message: &EmailMessage, format: OutputFormat) -> String {
    format!(
        "{}_{}_{}.{}",
        message.timestamp.format("%Y%m%d_%H%M%S"),
        short_message_id(&message.id),
        sanitize_subject(&message.subject),
        format.extension()
    )
}

/// Re-reads a message written in the JSON layout. Attachment content is
/// not part of that layout and comes back empty.
pub fn load_json(path: impl AsRef<Path>) -> Result<EmailMessage> {
    let content = fs::read_to_string(path.as_ref())?;
    format::parse_json(&content)
}

/// Creates `dir/filename` exclusively, falling back to numbered variants.
fn create_unique(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let (base, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], Some(&filename[dot..])),
        _ => (filename, None),
    };

    for counter in 1..=MAX_COLLISION_ATTEMPTS {
        let candidate = if counter == 1 {
            filename.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let path = dir.join(&candidate);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(content)?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(MailError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", dir.join(filename).display()),
    )))
}
