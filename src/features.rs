//! Feature preparation: from a loaded table to a standardized matrix

use std::collections::BTreeSet;
use std::path::PathBuf;

use ndarray::Array2;
use polars::prelude::*;
use serde_json::Value;
use tracing::debug;

use crate::adapters::AdapterRegistry;
use crate::config::DimredConfig;
use crate::data::{PrepareInfo, PreparedMatrix, Resource, ResourceView};
use crate::error::{DimredError, DimredResult};

/// Seed for the row-sampling step, fixed so previews are reproducible.
const SAMPLE_SEED: u64 = 42;

/// Resolve, load and prepare in one call.
pub fn prepare_from_resource(
	registry: &AdapterRegistry,
	resource: &Resource,
	view: &ResourceView,
	filepath: Option<PathBuf>,
	config: &DimredConfig,
) -> DimredResult<PreparedMatrix> {
	let df = load_dataframe(registry, resource, view, filepath, config)?;
	prepare_matrix(&df, view, config)
}

/// Load the resource's table through the registered adapter.
pub fn load_dataframe(
	registry: &AdapterRegistry,
	resource: &Resource,
	view: &ResourceView,
	filepath: Option<PathBuf>,
	config: &DimredConfig,
) -> DimredResult<DataFrame> {
	let factory = registry
		.resolve(resource)
		.ok_or_else(|| DimredError::AdapterNotFound {
			format: resource.format.to_lowercase(),
		})?;
	let adapter = factory(resource, view, filepath, config)?;
	adapter.dataframe()
}

/// Turn a table into a standardized feature matrix.
///
/// ## Processing Steps
///
/// 1. Empty tables are rejected outright.
/// 2. Tables above `max_rows` are sampled down with a fixed seed, so the
///    same table always yields the same subset.
/// 3. A non-empty `color_by` naming a real column is captured as one
///    string label per used row.
/// 4. The view's `feature_columns` (JSON array, native array, or
///    comma-separated string) restricts which source columns are
///    considered; names not in the table are dropped, and an empty
///    selection means no restriction.
/// 5. Numeric columns (intersected with the selection) feed the matrix
///    directly; none left is an error.
/// 6. When categorical encoding is enabled, non-numeric columns inside
///    the selection with `1 < distinct <= max_categories_for_ohe` levels
///    (missing values ignored) are one-hot encoded, color column
///    excluded. Levels are emitted in sorted order, missing values get
///    all-zero indicators.
/// 7. Missing numerics are filled with the column mean, or 0.0 when the
///    whole column is missing. Fewer than two encoded columns is an
///    error.
/// 8. Every column is standardized to zero mean and unit variance using
///    population statistics of the sampled rows; constant columns are
///    left centered.
pub fn prepare_matrix(
	df: &DataFrame,
	view: &ResourceView,
	config: &DimredConfig,
) -> DimredResult<PreparedMatrix> {
	if df.height() == 0 || df.width() == 0 {
		return Err(DimredError::NotEnoughFeatures);
	}
	let n_rows_original = df.height();
	let df = maybe_limit_rows(df, config.max_rows)?;

	let (color_by, color_values) = extract_color_info(&df, view)?;
	let selection = selected_feature_columns(&df, view);
	let numeric = select_numeric_columns(&df, selection.as_deref())?;
	let categorical = select_categorical_columns(
		&df,
		selection.as_deref(),
		color_by.as_deref(),
		config,
	)?;
	debug!(
		"Features: {} numeric, {} categorical of {} columns",
		numeric.len(),
		categorical.len(),
		df.width()
	);

	let values = build_feature_matrix(&df, &numeric, &categorical)?;
	let values = standardize(values);

	let info = PrepareInfo {
		n_rows_original,
		n_rows_used: df.height(),
		n_features: values.ncols(),
		numeric_used: numeric,
		categorical_used: categorical,
		color_by,
		color_values,
		feature_columns: selection,
	};
	Ok(PreparedMatrix { values, info })
}

fn maybe_limit_rows(df: &DataFrame, max_rows: usize) -> DimredResult<DataFrame> {
	if max_rows > 0 && df.height() > max_rows {
		debug!("Features: sampling {} of {} rows", max_rows, df.height());
		Ok(df.sample_n_literal(max_rows, false, false, Some(SAMPLE_SEED))?)
	} else {
		Ok(df.clone())
	}
}

fn extract_color_info(
	df: &DataFrame,
	view: &ResourceView,
) -> DimredResult<(Option<String>, Option<Vec<String>>)> {
	let Some(raw) = view.color_by.as_deref() else {
		return Ok((None, None));
	};
	let name = raw.trim();
	if name.is_empty() {
		return Ok((None, None));
	}
	let Ok(column) = df.column(name) else {
		return Ok((None, None));
	};
	let strings = column.cast(&DataType::String)?;
	let values: Vec<String> = strings
		.str()?
		.into_iter()
		.map(|v| v.unwrap_or("").to_string())
		.collect();
	Ok((Some(name.to_string()), Some(values)))
}

/// Normalize the view's column selection against the table.
///
/// Returns `None` when no usable restriction remains, which downstream
/// means "use everything".
fn selected_feature_columns(df: &DataFrame, view: &ResourceView) -> Option<Vec<String>> {
	let raw = view.feature_columns.as_ref()?;
	let mut selected: Vec<String> = match raw {
		Value::Array(items) => stringify_items(items),
		Value::String(text) => match serde_json::from_str::<Value>(text) {
			Ok(Value::Array(items)) => stringify_items(&items),
			Ok(_) => Vec::new(),
			Err(_) => text
				.split(',')
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(String::from)
				.collect(),
		},
		_ => Vec::new(),
	};
	selected.retain(|name| df.column(name).is_ok());
	if selected.is_empty() {
		None
	} else {
		Some(selected)
	}
}

pub(crate) fn stringify_items(items: &[Value]) -> Vec<String> {
	items
		.iter()
		.map(|item| match item {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		})
		.collect()
}

fn select_numeric_columns(
	df: &DataFrame,
	selection: Option<&[String]>,
) -> DimredResult<Vec<String>> {
	let mut numeric: Vec<String> = df
		.get_columns()
		.iter()
		.filter(|col| col.dtype().is_numeric())
		.map(|col| col.name().to_string())
		.collect();
	if let Some(selection) = selection {
		numeric.retain(|name| selection.iter().any(|s| s == name));
	}
	if numeric.is_empty() {
		return Err(DimredError::NoNumericColumns);
	}
	Ok(numeric)
}

fn select_categorical_columns(
	df: &DataFrame,
	selection: Option<&[String]>,
	color_by: Option<&str>,
	config: &DimredConfig,
) -> DimredResult<Vec<String>> {
	if !config.enable_categorical {
		return Ok(Vec::new());
	}
	let mut categorical = Vec::new();
	for col in df.get_columns() {
		let name = col.name();
		if col.dtype().is_numeric() || Some(name) == color_by {
			continue;
		}
		if let Some(selection) = selection {
			if !selection.iter().any(|s| s == name) {
				continue;
			}
		}
		let distinct = col.drop_nulls().n_unique()?;
		if distinct > 1 && distinct <= config.max_categories_for_ohe {
			categorical.push(name.to_string());
		}
	}
	Ok(categorical)
}

fn build_feature_matrix(
	df: &DataFrame,
	numeric: &[String],
	categorical: &[String],
) -> DimredResult<Array2<f64>> {
	let n_rows = df.height();
	let mut columns: Vec<Vec<f64>> = Vec::new();

	for name in numeric {
		let series = df.column(name)?.cast(&DataType::Float64)?;
		let values: Vec<Option<f64>> = series.f64()?.into_iter().collect();
		columns.push(fill_missing(values));
	}

	for name in categorical {
		let series = df.column(name)?.cast(&DataType::String)?;
		let raw: Vec<Option<&str>> = series.str()?.into_iter().collect();
		// Sorted levels keep one-hot column order stable across runs
		let levels: BTreeSet<&str> = raw.iter().flatten().copied().collect();
		for level in levels {
			let indicator: Vec<f64> = raw
				.iter()
				.map(|v| if *v == Some(level) { 1.0 } else { 0.0 })
				.collect();
			columns.push(indicator);
		}
	}

	if columns.len() < 2 {
		return Err(DimredError::NotEnoughFeatures);
	}

	let mut values = Array2::<f64>::zeros((n_rows, columns.len()));
	for (j, column) in columns.iter().enumerate() {
		for (i, v) in column.iter().enumerate() {
			values[[i, j]] = *v;
		}
	}
	Ok(values)
}

fn fill_missing(values: Vec<Option<f64>>) -> Vec<f64> {
	let mut sum = 0.0;
	let mut count = 0usize;
	for v in values.iter().flatten() {
		if !v.is_nan() {
			sum += v;
			count += 1;
		}
	}
	let fill = if count > 0 { sum / count as f64 } else { 0.0 };
	values
		.into_iter()
		.map(|v| match v {
			Some(x) if !x.is_nan() => x,
			_ => fill,
		})
		.collect()
}

fn standardize(mut values: Array2<f64>) -> Array2<f64> {
	let n_rows = values.nrows();
	if n_rows == 0 {
		return values;
	}
	for mut column in values.columns_mut() {
		let mean = column.iter().sum::<f64>() / n_rows as f64;
		let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n_rows as f64;
		let scale = if var > 0.0 { var.sqrt() } else { 1.0 };
		for v in column.iter_mut() {
			*v = (*v - mean) / scale;
		}
	}
	values
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn view_with(feature_columns: Option<Value>, color_by: Option<&str>) -> ResourceView {
		ResourceView {
			id: "view-1".to_string(),
			method: String::new(),
			method_params: None,
			feature_columns,
			color_by: color_by.map(String::from),
		}
	}

	fn numeric_df() -> DataFrame {
		df!(
			"num1" => [1.0, 2.0, 3.0, 4.0],
			"num2" => [10.0, 20.0, 30.0, 40.0],
		)
		.unwrap()
	}

	fn assert_close(actual: f64, expected: f64) {
		assert!(
			(actual - expected).abs() < 1e-9,
			"expected {expected}, got {actual}"
		);
	}

	#[test]
	fn test_numeric_preparation() {
		let prepared =
			prepare_matrix(&numeric_df(), &view_with(None, None), &DimredConfig::default())
				.unwrap();
		assert_eq!(prepared.values.dim(), (4, 2));
		assert_eq!(prepared.info.n_rows_original, 4);
		assert_eq!(prepared.info.n_rows_used, 4);
		assert_eq!(prepared.info.n_features, 2);
		assert_eq!(prepared.info.numeric_used, vec!["num1", "num2"]);
		assert!(prepared.info.categorical_used.is_empty());
		assert!(prepared.info.feature_columns.is_none());

		// Standardized columns have zero mean and unit variance
		for j in 0..2 {
			let column: Vec<f64> = (0..4).map(|i| prepared.values[[i, j]]).collect();
			let mean = column.iter().sum::<f64>() / 4.0;
			let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
			assert_close(mean, 0.0);
			assert_close(var, 1.0);
		}
	}

	#[test]
	fn test_no_numeric_columns() {
		let df = df!(
			"a" => ["foo", "baz"],
			"b" => ["bar", "qux"],
		)
		.unwrap();
		let err = prepare_matrix(&df, &view_with(None, None), &DimredConfig::default())
			.unwrap_err();
		assert!(matches!(err, DimredError::NoNumericColumns));
	}

	#[test]
	fn test_single_column_is_not_enough() {
		let df = df!("value" => [1.0, 2.0, 3.0]).unwrap();
		let err = prepare_matrix(&df, &view_with(None, None), &DimredConfig::default())
			.unwrap_err();
		assert!(matches!(err, DimredError::NotEnoughFeatures));
	}

	#[test]
	fn test_empty_frame() {
		let err = prepare_matrix(
			&DataFrame::empty(),
			&view_with(None, None),
			&DimredConfig::default(),
		)
		.unwrap_err();
		assert!(matches!(err, DimredError::NotEnoughFeatures));
	}

	#[test]
	fn test_selection_as_json_array() {
		let df = df!(
			"num1" => [1.0, 2.0, 3.0],
			"num2" => [4.0, 5.0, 6.0],
			"num3" => [7.0, 8.0, 9.0],
		)
		.unwrap();
		let view = view_with(Some(json!(["num1", "num2"])), None);
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert_eq!(prepared.info.numeric_used, vec!["num1", "num2"]);
		assert_eq!(
			prepared.info.feature_columns,
			Some(vec!["num1".to_string(), "num2".to_string()])
		);
	}

	#[test]
	fn test_selection_as_json_string_and_comma_fallback() {
		let df = df!(
			"num1" => [1.0, 2.0, 3.0],
			"num2" => [4.0, 5.0, 6.0],
			"num3" => [7.0, 8.0, 9.0],
		)
		.unwrap();

		let view = view_with(Some(json!("[\"num1\", \"num3\"]")), None);
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert_eq!(prepared.info.numeric_used, vec!["num1", "num3"]);

		// Not valid JSON, so it splits on commas
		let view = view_with(Some(json!("num1, num2")), None);
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert_eq!(prepared.info.numeric_used, vec!["num1", "num2"]);
	}

	#[test]
	fn test_selection_of_unknown_columns_means_unrestricted() {
		let df = numeric_df();
		let view = view_with(Some(json!(["nothere"])), None);
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert_eq!(prepared.info.numeric_used, vec!["num1", "num2"]);
		assert!(prepared.info.feature_columns.is_none());
	}

	#[test]
	fn test_selection_of_only_categorical_fails() {
		let df = df!(
			"num1" => [1.0, 2.0, 3.0],
			"num2" => [4.0, 5.0, 6.0],
			"cat" => ["a", "b", "a"],
		)
		.unwrap();
		let view = view_with(Some(json!(["cat"])), None);
		let err = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap_err();
		assert!(matches!(err, DimredError::NoNumericColumns));
	}

	#[test]
	fn test_categorical_one_hot() {
		let df = df!(
			"n1" => [1.0, 2.0, 3.0, 4.0],
			"n2" => [4.0, 3.0, 2.0, 1.0],
			"cat" => ["b", "a", "b", "a"],
		)
		.unwrap();
		let prepared =
			prepare_matrix(&df, &view_with(None, None), &DimredConfig::default()).unwrap();
		// Two numeric plus one indicator per sorted level
		assert_eq!(prepared.info.n_features, 4);
		assert_eq!(prepared.info.categorical_used, vec!["cat"]);

		let disabled = DimredConfig {
			enable_categorical: false,
			..DimredConfig::default()
		};
		let prepared = prepare_matrix(&df, &view_with(None, None), &disabled).unwrap();
		assert_eq!(prepared.info.n_features, 2);
		assert!(prepared.info.categorical_used.is_empty());
	}

	#[test]
	fn test_categorical_cardinality_bounds() {
		let df = df!(
			"n1" => [1.0, 2.0, 3.0],
			"n2" => [4.0, 5.0, 6.0],
			"constant" => ["x", "x", "x"],
			"wide" => ["a", "b", "c"],
		)
		.unwrap();
		let config = DimredConfig {
			max_categories_for_ohe: 2,
			..DimredConfig::default()
		};
		let prepared = prepare_matrix(&df, &view_with(None, None), &config).unwrap();
		// One level and too many levels are both skipped
		assert!(prepared.info.categorical_used.is_empty());
		assert_eq!(prepared.info.n_features, 2);
	}

	#[test]
	fn test_color_extraction() {
		let df = df!(
			"n1" => [1.0, 2.0, 3.0],
			"n2" => [4.0, 5.0, 6.0],
			"label" => ["a", "b", "a"],
		)
		.unwrap();
		let view = view_with(None, Some("label"));
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert_eq!(prepared.info.color_by.as_deref(), Some("label"));
		assert_eq!(
			prepared.info.color_values,
			Some(vec!["a".to_string(), "b".to_string(), "a".to_string()])
		);
		// The color column never doubles as a categorical feature
		assert!(prepared.info.categorical_used.is_empty());

		// Unknown color column is silently absent
		let view = view_with(None, Some("missing"));
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		assert!(prepared.info.color_by.is_none());
		assert!(prepared.info.color_values.is_none());

		// Numeric color columns are stringified
		let view = view_with(None, Some("n1"));
		let prepared = prepare_matrix(&df, &view, &DimredConfig::default()).unwrap();
		let values = prepared.info.color_values.unwrap();
		assert_eq!(values.len(), 3);
		assert!(values[0].starts_with('1'));
	}

	#[test]
	fn test_row_sampling_is_deterministic() {
		let n1: Vec<f64> = (0..100).map(|i| i as f64).collect();
		let n2: Vec<f64> = (0..100).map(|i| (i * 3) as f64).collect();
		let df = df!("n1" => &n1, "n2" => &n2).unwrap();
		let config = DimredConfig {
			max_rows: 10,
			..DimredConfig::default()
		};

		let first = prepare_matrix(&df, &view_with(None, None), &config).unwrap();
		let second = prepare_matrix(&df, &view_with(None, None), &config).unwrap();
		assert_eq!(first.info.n_rows_original, 100);
		assert_eq!(first.info.n_rows_used, 10);
		assert_eq!(first.values, second.values);
		assert_eq!(first.info, second.info);
	}

	#[test]
	fn test_mean_fill_lands_on_standardized_zero() {
		let df = df!(
			"a" => [Some(1.0), None, Some(3.0)],
			"b" => [1.0, 2.0, 3.0],
		)
		.unwrap();
		let prepared =
			prepare_matrix(&df, &view_with(None, None), &DimredConfig::default()).unwrap();
		// The filled cell equals the column mean, which standardizes to 0
		assert_eq!(prepared.values[[1, 0]], 0.0);
	}

	#[test]
	fn test_constant_column_stays_finite() {
		let df = df!(
			"a" => [5.0, 5.0, 5.0],
			"b" => [1.0, 2.0, 3.0],
		)
		.unwrap();
		let prepared =
			prepare_matrix(&df, &view_with(None, None), &DimredConfig::default()).unwrap();
		for i in 0..3 {
			assert_eq!(prepared.values[[i, 0]], 0.0);
		}
	}
}
