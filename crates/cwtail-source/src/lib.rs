//! Log source clients for cwtail
//!
//! This crate provides the remote log source seam, the CloudWatch Logs
//! implementation, an in-memory source, and identifier resolution.

mod client;
mod cloudwatch;
mod memory;
mod resolve;

pub use client::{SourceCatalog, SourceClient};
pub use cloudwatch::CloudWatchClient;
pub use memory::{FetchCall, InMemorySource};
pub use resolve::{Resolution, pick_candidate, resolve};

// Re-export types that are used in our public API
pub use cwtail_types::{FetchPage, LogRecord, PollWindow, SourceError, SourceSpec};
