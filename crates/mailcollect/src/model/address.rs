//! Email address value type.

use std::fmt;

/// A mailbox address with an optional display name.
///
/// Equality compares the address only, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct EmailAddress {
    pub address: String,
    pub display_name: Option<String>,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// The part of the address before `@`.
    pub fn local_part(&self) -> &str {
        self.address
            .split_once('@')
            .map(|(local, _)| local)
            .unwrap_or(&self.address)
    }
}

impl PartialEq for EmailAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for EmailAddress {}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}
