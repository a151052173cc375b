//! Shared types, error model, and configuration for the opengov pipeline.
//!
//! This crate is the foundation depended on by all other opengov crates.
//! It provides:
//! - [`OpenGovError`] — the unified error type
//! - Domain types ([`RawDocument`], [`PolicyDocument`], [`FeedEntry`], [`ImpactScore`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalyzerConfig, AppConfig, PipelineConfig, RegistryConfig, StorageConfig, config_dir,
    config_file_path, expand_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{OpenGovError, Result};
pub use types::{
    CanonicalFields, DocumentError, EnrichmentPatch, FeedEntry, ImpactScore, PolicyDocument,
    RawDocument, unique_key,
};
