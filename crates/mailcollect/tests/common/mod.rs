//! Shared test utilities for mailcollect integration tests.
//!
//! This module provides:
//! - `TestHarness` with a mock HTTP server and isolated token files
//! - Builders for Graph payloads and normalized messages

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{RecordingPrompt, TestHarness};
