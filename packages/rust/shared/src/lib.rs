//! Shared types, error model, and configuration for paper-discussion.
//!
//! This crate is the foundation depended on by all other paper-discussion crates.
//! It provides:
//! - [`PaperDiscError`] and [`RunError`], the error taxonomy
//! - Domain types ([`ItemId`], [`RunState`], [`Lease`], [`PaperMeta`])
//! - Configuration ([`AppConfig`], config loading and validation)
//! - [`write_atomic`] for crash-safe file replacement

pub mod config;
pub mod error;
pub mod fs;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArxivConfig, LeaseConfig, OutputConfig, SourceConfig, StateBackendKind,
    StateConfig, config_dir, config_file_path, init_config, load_config, load_config_at,
    load_config_from, validate_config,
};
pub use error::{PaperDiscError, Result, RunError};
pub use fs::write_atomic;
pub use types::{CURRENT_STATE_VERSION, ItemId, Lease, PaperMeta, RunState};
