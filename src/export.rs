//! CSV rendering of computed embeddings

use polars::prelude::*;

use crate::data::PreviewMeta;
use crate::error::DimredResult;

/// Render an embedding as CSV text.
///
/// Columns are `dim_1..dim_n`; when the preview carries a color column
/// whose value count matches the row count, that column is appended under
/// its original name. Values come out in Polars' float notation, so whole
/// numbers keep a trailing `.0`.
pub fn embedding_to_csv(embedding: &[Vec<f64>], meta: &PreviewMeta) -> DimredResult<String> {
	let n_dims = embedding.first().map(|row| row.len()).unwrap_or(1);

	let info = &meta.prepare_info;
	let color = match (&info.color_by, &info.color_values) {
		(Some(name), Some(values)) if !name.is_empty() && values.len() == embedding.len() => {
			Some((name.as_str(), values))
		}
		_ => None,
	};

	let mut columns: Vec<Series> = (0..n_dims)
		.map(|d| {
			let values: Vec<f64> = embedding
				.iter()
				.map(|row| row.get(d).copied().unwrap_or(f64::NAN))
				.collect();
			Series::new(&format!("dim_{}", d + 1), values)
		})
		.collect();
	if let Some((name, values)) = color {
		columns.push(Series::new(name, values.clone()));
	}

	let mut df = DataFrame::new(columns)?;
	let mut buf = Vec::new();
	CsvWriter::new(&mut buf).finish(&mut df)?;
	Ok(String::from_utf8_lossy(&buf).into_owned())
}
