//! # Respno Common Library
//!
//! Shared code for the respondent-identifier workspace including:
//! - Error and result types
//! - Configuration loading and data folder resolution
//! - Logging initialization
//! - Mutation event types and the event bus
//! - Timestamp and identifier utilities

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
