//! # seamless-core
//!
//! Core types, configuration, and error handling for the seamless chunked
//! stream player.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClientConfig, EngineConfig};
pub use error::{Error, HttpError, Result};
pub use types::*;
