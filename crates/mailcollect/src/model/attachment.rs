/// A file attached to a message. Owned by exactly one [`EmailMessage`].
///
/// `content` is empty when only metadata was retrieved.
///
/// [`EmailMessage`]: super::EmailMessage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content: Vec<u8>,
    pub content_id: Option<String>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            size_bytes: content.len() as u64,
            content,
            content_id: None,
        }
    }

    /// True when the binary payload was downloaded.
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}
