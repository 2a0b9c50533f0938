//! Core data model: resources, views, and computed previews

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A low-dimensional embedding as plain rows, one inner vector per sample.
pub type Embedding = Vec<Vec<f64>>;

/// A dataset resource as the hosting application describes it.
///
/// Only the fields the pipeline reads are modeled; anything else in the
/// hosting application's resource dict is ignored during deserialization.
/// `size` stays loosely typed because real catalogs deliver it as a number,
/// a numeric string, or null depending on the harvester that wrote it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
	pub id: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub format: String,
	#[serde(default)]
	pub size: Option<Value>,
	/// Origin marker, "upload" or "url" where the host distinguishes them
	#[serde(rename = "type", default)]
	pub kind: String,
}

impl Resource {
	/// Declared size in bytes, if the resource carries a usable one.
	///
	/// Numbers pass through (floats truncate), numeric strings parse,
	/// everything else is treated as undeclared.
	pub fn declared_size_bytes(&self) -> Option<i64> {
		match &self.size {
			Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
			Some(Value::String(s)) => {
				let trimmed = s.trim();
				if trimmed.is_empty() {
					None
				} else {
					trimmed.parse::<i64>().ok()
				}
			}
			_ => None,
		}
	}
}

/// Per-view settings chosen by the person configuring the preview.
///
/// `method_params` and `feature_columns` stay as raw JSON values here:
/// views arrive from form submissions where both may be objects, arrays,
/// or strings that still need validation. Parsing happens at the pipeline
/// boundary so malformed input turns into a validation error, not a
/// deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceView {
	pub id: String,
	#[serde(default)]
	pub method: String,
	#[serde(default)]
	pub method_params: Option<Value>,
	#[serde(default)]
	pub feature_columns: Option<Value>,
	#[serde(default)]
	pub color_by: Option<String>,
}

/// What feature preparation actually did to the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareInfo {
	/// Rows in the loaded table before sampling
	pub n_rows_original: usize,
	/// Rows that went into the feature matrix
	pub n_rows_used: usize,
	/// Columns of the feature matrix after encoding
	pub n_features: usize,
	/// Numeric source columns used, in table order
	pub numeric_used: Vec<String>,
	/// Categorical source columns that were one-hot encoded
	pub categorical_used: Vec<String>,
	/// Color column, when requested and present in the table
	pub color_by: Option<String>,
	/// One label per used row, aligned with the embedding
	pub color_values: Option<Vec<String>>,
	/// The caller's column selection after normalization, if any
	pub feature_columns: Option<Vec<String>>,
}

/// A standardized feature matrix together with how it was built.
#[derive(Debug, Clone)]
pub struct PreparedMatrix {
	pub values: Array2<f64>,
	pub info: PrepareInfo,
}

/// Method provenance attached to every preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewMeta {
	/// Method that produced the embedding
	pub method: String,
	/// Effective parameters after merging view params over defaults
	pub method_params: Value,
	pub prepare_info: PrepareInfo,
}

/// A computed preview: the embedding plus the metadata describing how it
/// was produced.
///
/// ## JSON Shape
///
/// Serializes to the two-key object the cache and any rendering layer
/// consume:
///
/// - `embedding`: array of `[x, y, ...]` rows, one per used sample
/// - `meta.method`: method name, e.g. `"umap"`
/// - `meta.method_params`: the merged parameter object
/// - `meta.prepare_info`: row counts, column lists, color labels
///
/// ## Cache Round-Trip
///
/// Both keys are mandatory on deserialization. A cache entry missing
/// either one fails to decode and is treated as a miss, so a stale or
/// truncated payload can never surface as a half-formed preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
	pub embedding: Embedding,
	pub meta: PreviewMeta,
}

/// An embedding rendered as a downloadable CSV attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
	pub filename: String,
	pub content: String,
	pub content_type: String,
}
