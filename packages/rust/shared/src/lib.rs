//! Shared types, error model, and configuration for jobharvest.
//!
//! This crate is the foundation depended on by all other jobharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Listing`], [`EmployerPost`], [`RelatedListing`])
//! - Relative-date normalization ([`normalize_posted_date`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod dates;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlPoliciesConfig, ExportConfig, SelectorConfig, SourceConfig,
    StorageConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use dates::normalize_posted_date;
pub use error::{HarvestError, Result};
pub use types::{EmployerPost, Listing, RelatedListing};
