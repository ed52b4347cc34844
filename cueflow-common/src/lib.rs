//! # Cueflow Common Library
//!
//! Shared code for the Cueflow services including:
//! - Document id types and deterministic id derivation
//! - Event types (CueflowEvent enum)
//! - Configuration loading
//! - Error types
//! - Time and SSE utilities

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
