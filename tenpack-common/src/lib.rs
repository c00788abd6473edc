//! # Tenpack Common Library
//!
//! Shared code for the Tenpack weekly discovery competition:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Week boundary calculation
//! - Database schema, migrations and row models

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::WeekBounds;
