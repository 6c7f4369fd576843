//! Core types and utilities for the Snake Arena simulation.

pub mod types;
pub mod config;
pub mod error;
pub mod profile;

pub use error::{Error, Result};
pub use types::*;
pub use config::*;
pub use profile::*;
