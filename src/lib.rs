pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod infer;
pub mod items;
pub mod jobs;
pub mod loader;
pub mod model;
pub mod predictor;
pub mod staleness;
pub mod store;
pub mod trainer;

pub use error::{Result, TagwiseError};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
