//! Normalized domain model shared by every collector.

mod address;
mod attachment;
mod filter;
mod message;
mod options;
mod result;

pub use address::EmailAddress;
pub use attachment::Attachment;
pub use filter::EmailFilter;
pub use message::{EmailMessage, Priority, Status};
pub use options::{CollectOptions, OutputFormat, OutputOptions};
pub use result::CollectionResult;
