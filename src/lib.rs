//! Glasscast - low-latency screen casting to DLNA renderers
//!
//! This library crate exposes the core functionality for integration testing.

pub mod capture;
pub mod config;
pub mod dlna;
pub mod encoder;
pub mod error;
pub mod net;
pub mod session;
pub mod streaming;

pub use error::{Error, ErrorKind, Result};
