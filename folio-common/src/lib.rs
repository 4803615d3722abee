//! # Folio Common Library
//!
//! Shared code for Folio services:
//! - Error type and result alias
//! - Bootstrap TOML configuration and root folder resolution
//! - Progress event types
//! - SSE stream helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::{ProgressEvent, ProjectStatus};
