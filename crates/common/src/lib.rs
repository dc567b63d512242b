//! Meshplane Common Library
//!
//! Shared entity types, persistence, and value utilities for the Meshplane
//! mesh control plane.

pub mod crypto;
pub mod db;
pub mod error;
pub mod netaddr;
pub mod subnets;
pub mod types;

pub use crypto::WgKeyPair;
pub use db::{Database, Resource};
pub use error::{Error, Result};
pub use subnets::Subnets;
pub use types::*;

/// Meshplane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".meshplane")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
