//! # NLM Common Library
//!
//! Shared code for the newsletter manager services:
//! - Error type used across crates
//! - Root folder and TOML configuration resolution
//! - Database initialization and key/value settings access

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
