//! # Shrinkwire Core
//!
//! Core types, traits, and error handling shared by the Shrinkwire server and
//! client crates.
//!
//! This crate provides the foundational abstractions:
//! - Streaming body type and the middleware chain
//! - Bandwidth estimation wire headers and their parsers
//! - Error types
//! - Shared enums (accuracy tiers, per-route compression mode)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod headers;
pub mod middleware;
pub mod types;

pub use error::{Error, Result};
pub use middleware::{Body, Middleware, Next};
pub use types::*;

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::headers;
    pub use crate::middleware::{empty, full, Body, Middleware, Next};
    pub use crate::types::*;
}
