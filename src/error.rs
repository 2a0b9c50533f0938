//! Error types for the dimred pipeline

use thiserror::Error;

/// Domain error type covering all failure modes in the dimred pipeline.
///
/// `DimredError` carries a human-readable message per variant plus structured
/// context where a caller can act on it (the offending format, the size limit,
/// the rejected field).
///
/// ## Error Categories
///
/// ### Resource access
/// Resolving and loading the underlying tabular data:
/// - Missing resource URL or local path
/// - Declared size above the configured limit
/// - Remote fetch failures (timeout, DNS, HTTP status)
/// - Table parse failures for any supported format
///
/// ### Feature preparation
/// Turning a dataframe into a usable feature matrix:
/// - No numeric columns after column selection
/// - Fewer than two usable feature columns
///
/// ### Projection
/// Numerical preconditions of the reduction methods, such as a perplexity
/// that is not smaller than the sample count. These are never masked by the
/// pipeline.
///
/// ### Validation
/// User-facing input problems raised at the orchestration boundary:
/// disallowed method names, malformed `method_params`, export requested while
/// disabled. Distinct from domain errors so a hosting layer can map them to
/// form errors instead of failures.
///
/// Cache failures are deliberately absent here: the cache layer logs and
/// swallows its own [`CacheError`] family, so a broken cache degrades to
/// recomputation instead of a failed request.
///
/// ## Error Handling Patterns
///
/// ```rust
/// use dimred::error::DimredError;
///
/// fn user_message(err: &DimredError) -> String {
///     match err {
///         DimredError::NoNumericColumns => {
///             "Pick at least one numeric column for this view.".to_string()
///         }
///         DimredError::SizeExceeded { max } => {
///             format!("This file is larger than the {max} limit for previews.")
///         }
///         DimredError::Validation { field, message } => {
///             format!("{field}: {message}")
///         }
///         other => other.to_string(),
///     }
/// }
///
/// let err = DimredError::NoNumericColumns;
/// assert!(user_message(&err).contains("numeric column"));
/// ```
#[derive(Debug, Error)]
pub enum DimredError {
	/// File system I/O errors while reading local resources
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Polars DataFrame operation errors during feature preparation
	#[error("Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	/// Resource has neither a URL nor a local path
	#[error("Resource URL is empty.")]
	EmptyUrl,

	/// Declared resource size exceeds the configured limit
	#[error("Resource exceeds maximum allowed size for dimred processing: {max}")]
	SizeExceeded { max: String },

	/// HTTP fetch of a remote resource failed
	#[error("Error fetching remote resource: {reason}")]
	RemoteFetch { reason: String },

	/// No adapter registered or resolved for the resource format
	#[error("No tabular adapter available for this format: {format}")]
	AdapterNotFound { format: String },

	/// Table could not be parsed in the declared format
	#[error("Failed to load tabular data: {reason}")]
	TabularLoad { reason: String },

	/// Zero numeric columns remain after column selection
	#[error("No numeric columns found for dimred processing.")]
	NoNumericColumns,

	/// Empty dataframe, or fewer than two usable feature columns
	#[error("Not enough features for dimred.")]
	NotEnoughFeatures,

	/// Embedding has fewer than two dimensions and cannot be plotted
	#[error("Embedding must have at least 2 dimensions to plot.")]
	NarrowEmbedding,

	/// Numerical failure inside a projection method
	#[error("Projection failed: {reason}")]
	Projection { reason: String },

	/// Preview computation returned no result or an embedded error
	#[error("Dimred preview failed.")]
	PreviewFailed,

	/// User-facing validation failure for a named input field
	#[error("{message}")]
	Validation { field: String, message: String },
}

impl DimredError {
	/// Build a validation error for a named input field.
	pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
		DimredError::Validation {
			field: field.into(),
			message: message.into(),
		}
	}
}

/// Cache-layer errors. Logged and swallowed by the preview cache, never
/// surfaced through [`DimredError`].
#[derive(Debug, Error)]
pub enum CacheError {
	#[error("Cache entry corrupted: {key}")]
	Corrupted { key: String },

	#[error("Cache store error: {0}")]
	Store(#[from] sled::Error),

	#[error("Cache I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Cache JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Cache serialization error: {0}")]
	Serialization(#[from] bincode::Error),
}

/// Convenience type alias for Results in the dimred pipeline.
///
/// `DimredResult<T>` is equivalent to `Result<T, DimredError>` and is used
/// throughout the API.
///
/// ## Usage
///
/// ```rust
/// use dimred::error::{DimredError, DimredResult};
///
/// fn parse_components(raw: &str) -> DimredResult<usize> {
///     raw.parse().map_err(|_| {
///         DimredError::validation("n_components", "n_components must be an integer.")
///     })
/// }
///
/// assert!(parse_components("3").is_ok());
/// assert!(parse_components("three").is_err());
/// ```
pub type DimredResult<T> = Result<T, DimredError>;

/// Convenience type alias for cache operation results.
pub type CacheResult<T> = Result<T, CacheError>;
