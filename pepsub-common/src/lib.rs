//! # pepsub Common Library
//!
//! Shared code for the pepsub workspace including:
//! - Error types
//! - TOML configuration loading and resolution
//! - Job progress events and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
