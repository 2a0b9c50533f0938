//! Embedding summaries and human-readable formatting helpers

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::PreviewResult;
use crate::error::{DimredError, DimredResult};

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count the way the size-limit error reports it.
///
/// ```rust
/// use dimred::summary::printable_file_size;
///
/// assert_eq!(printable_file_size(0), "0 B");
/// assert_eq!(printable_file_size(1024 * 1024), "1.0 MB");
/// assert_eq!(printable_file_size(1536), "1.5 KB");
/// ```
pub fn printable_file_size(size_bytes: u64) -> String {
	if size_bytes == 0 {
		return "0 B".to_string();
	}
	let exponent = ((size_bytes as f64).ln() / 1024f64.ln()).floor() as usize;
	let exponent = exponent.min(SIZE_UNITS.len() - 1);
	let scaled = size_bytes as f64 / 1024f64.powi(exponent as i32);
	format!("{:.1} {}", scaled, SIZE_UNITS[exponent])
}

/// Value range of one embedding dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimRange {
	pub name: String,
	pub min: f64,
	pub max: f64,
}

/// How often one color label occurs in the embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassCount {
	pub label: String,
	pub count: usize,
}

/// Statistics derived from a computed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSummary {
	pub n_points: usize,
	pub n_dims: usize,
	/// Per-dimension range, NaN coordinates ignored
	pub dim_stats: Vec<DimRange>,
	pub color_by: Option<String>,
	/// Distinct labels, only when every point carries one
	pub n_classes: Option<usize>,
	/// Most frequent labels, largest first, ties by label
	pub top_classes: Vec<ClassCount>,
}

/// Flattened preview description for templates and status endpoints.
///
/// Every field is plain data so a rendering layer can interpolate it
/// without touching the embedding itself. Column lists are truncated to a
/// sample plus an overflow count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySummary {
	pub method: String,
	pub components: Option<usize>,
	pub rows_used: usize,
	pub rows_original: usize,
	pub points: Option<usize>,
	pub color_by: Option<String>,
	pub classes: Option<usize>,
	pub top_classes: Vec<ClassCount>,
	pub ranges: Vec<DimRange>,
	pub features: usize,
	pub numeric_count: usize,
	pub categorical_count: usize,
	pub numeric_sample: Vec<String>,
	pub numeric_more: usize,
	pub categorical_sample: Vec<String>,
	pub categorical_more: usize,
}

fn dimension_name(idx: usize) -> String {
	match idx {
		0 => "x".to_string(),
		1 => "y".to_string(),
		2 => "z".to_string(),
		_ => format!("dim_{}", idx + 1),
	}
}

/// Check that an embedding is wide enough to plot.
pub fn ensure_plottable(embedding: &[Vec<f64>]) -> DimredResult<()> {
	match embedding.first() {
		Some(row) if row.len() >= 2 => Ok(()),
		_ => Err(DimredError::NarrowEmbedding),
	}
}

/// Summarize a computed preview, or `None` when the embedding is empty or
/// not rectangular.
pub fn embedding_summary(result: &PreviewResult, top_n: usize) -> Option<EmbeddingSummary> {
	let embedding = &result.embedding;
	let first = embedding.first()?;
	let n_dims = first.len();
	if n_dims == 0 || embedding.iter().any(|row| row.len() != n_dims) {
		return None;
	}
	let n_points = embedding.len();

	let mut dim_stats = Vec::with_capacity(n_dims);
	for dim in 0..n_dims {
		let mut min = f64::NAN;
		let mut max = f64::NAN;
		for row in embedding {
			let v = row[dim];
			if v.is_nan() {
				continue;
			}
			if min.is_nan() || v < min {
				min = v;
			}
			if max.is_nan() || v > max {
				max = v;
			}
		}
		dim_stats.push(DimRange {
			name: dimension_name(dim),
			min,
			max,
		});
	}

	let info = &result.meta.prepare_info;
	let color_by = info.color_by.clone().filter(|c| !c.is_empty());
	let mut n_classes = None;
	let mut top_classes = Vec::new();
	if let (Some(_), Some(values)) = (&color_by, &info.color_values) {
		if values.len() == n_points {
			let mut counts: HashMap<&str, usize> = HashMap::new();
			for value in values {
				*counts.entry(value.as_str()).or_insert(0) += 1;
			}
			n_classes = Some(counts.len());
			let mut ranked: Vec<ClassCount> = counts
				.into_iter()
				.map(|(label, count)| ClassCount {
					label: label.to_string(),
					count,
				})
				.collect();
			ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
			ranked.truncate(top_n);
			top_classes = ranked;
		}
	}

	Some(EmbeddingSummary {
		n_points,
		n_dims,
		dim_stats,
		color_by,
		n_classes,
		top_classes,
	})
}

/// Build the flat display payload from a preview and its optional summary.
pub fn display_summary(
	result: &PreviewResult,
	summary: Option<&EmbeddingSummary>,
	top_n_columns: usize,
) -> DisplaySummary {
	let meta = &result.meta;
	let info = &meta.prepare_info;

	let components = summary.map(|s| s.n_dims).or_else(|| {
		meta.method_params
			.get("n_components")
			.and_then(serde_json::Value::as_u64)
			.map(|v| v as usize)
	});

	let numeric = &info.numeric_used;
	let categorical = &info.categorical_used;

	DisplaySummary {
		method: meta.method.clone(),
		components,
		rows_used: info.n_rows_used,
		rows_original: info.n_rows_original,
		points: summary.map(|s| s.n_points),
		color_by: summary
			.map(|s| s.color_by.clone())
			.unwrap_or_else(|| info.color_by.clone()),
		classes: summary.and_then(|s| s.n_classes),
		top_classes: summary.map(|s| s.top_classes.clone()).unwrap_or_default(),
		ranges: summary.map(|s| s.dim_stats.clone()).unwrap_or_default(),
		features: info.n_features,
		numeric_count: numeric.len(),
		categorical_count: categorical.len(),
		numeric_sample: numeric.iter().take(top_n_columns).cloned().collect(),
		numeric_more: numeric.len().saturating_sub(top_n_columns),
		categorical_sample: categorical.iter().take(top_n_columns).cloned().collect(),
		categorical_more: categorical.len().saturating_sub(top_n_columns),
	}
}
