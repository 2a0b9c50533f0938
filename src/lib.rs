//! # Dimensionality-Reduction Preview Pipeline
//!
//! Turns tabular resources (CSV, TSV, Excel) into 2-D scatter embeddings for
//! preview, using UMAP, t-SNE, or PCA over a standardized feature matrix.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod features;
pub mod methods;
pub mod pipeline;
pub mod summary;

// Re-export main API types
pub use config::DimredConfig;
pub use data::{PreviewResult, Resource, ResourceView};
pub use error::{DimredError, DimredResult};
pub use pipeline::DimredPipeline;
