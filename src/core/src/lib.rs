//! Shared types for the lamina build engine.

pub mod config;
pub mod error;

pub use config::{BuildConfig, STAGE_TAR};
pub use error::{LaminaError, Result};
