//! Adapter for delimited text and Excel workbooks

use std::io::Cursor;
use std::path::PathBuf;

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use polars::prelude::*;
use tracing::warn;

use crate::adapters::{ResourceAdapter, ResourceSource};
use crate::config::DimredConfig;
use crate::data::{Resource, ResourceView};
use crate::error::{DimredError, DimredResult};

/// Prefix size fetched when sniffing remote CSV/TSV headers.
const COLUMN_SNIFF_BYTES: usize = 128 * 1024;

/// Adapter behind the built-in `csv`, `tsv`, `xls` and `xlsx` formats.
///
/// ## Format Handling
///
/// - `csv` parses with a comma separator, `tsv` with a tab
/// - `xls`/`xlsx` go through calamine, first worksheet only
/// - anything else routed here is tried as comma-separated text, which
///   keeps unregistered-but-really-CSV formats working
///
/// ## Column Sniffing
///
/// [`TabularAdapter::columns`] avoids a full load: delimited files parse
/// only the header (a 128 KiB prefix for remote ones), workbooks read the
/// first row of the first sheet. When the cheap path fails to parse, it
/// logs a warning and falls back to the full load.
pub struct TabularAdapter {
	source: ResourceSource,
	format: String,
}

impl TabularAdapter {
	/// Factory with the registry's [`AdapterFactory`] signature.
	///
	/// [`AdapterFactory`]: crate::adapters::AdapterFactory
	pub fn create(
		resource: &Resource,
		_view: &ResourceView,
		filepath: Option<PathBuf>,
		config: &DimredConfig,
	) -> DimredResult<Box<dyn ResourceAdapter>> {
		let source = ResourceSource::resolve(resource, filepath, config)?;
		Ok(Box::new(Self {
			format: resource.format.to_lowercase(),
			source,
		}))
	}

	fn is_excel(&self) -> bool {
		matches!(self.format.as_str(), "xls" | "xlsx")
	}

	fn is_delimited(&self) -> bool {
		matches!(self.format.as_str(), "csv" | "tsv")
	}

	fn separator(&self) -> u8 {
		if self.format == "tsv" {
			b'\t'
		} else {
			b','
		}
	}

	fn csv_from_bytes(&self, bytes: Vec<u8>, n_rows: Option<usize>) -> PolarsResult<DataFrame> {
		CsvReader::new(Cursor::new(bytes))
			.with_separator(self.separator())
			.has_header(true)
			.with_n_rows(n_rows)
			.finish()
	}

	fn csv_from_path(&self, n_rows: Option<usize>) -> PolarsResult<DataFrame> {
		CsvReader::from_path(&self.source.location)?
			.with_separator(self.separator())
			.has_header(true)
			.with_n_rows(n_rows)
			.finish()
	}

	fn excel_range(&self) -> DimredResult<Range<Data>> {
		if self.source.remote {
			let bytes = self.source.fetch_remote(&self.source.location, None)?;
			let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
				.map_err(|e| DimredError::TabularLoad {
					reason: e.to_string(),
				})?;
			first_sheet_range(&mut workbook)
		} else {
			let mut workbook =
				open_workbook_auto(&self.source.location).map_err(|e| {
					DimredError::TabularLoad {
						reason: e.to_string(),
					}
				})?;
			first_sheet_range(&mut workbook)
		}
	}

	/// Header names without materializing the table, where the format
	/// allows it.
	fn sniff_columns(&self) -> DimredResult<Vec<String>> {
		if self.is_delimited() {
			let parsed = if self.source.remote {
				let bytes = self
					.source
					.fetch_remote(&self.source.location, Some(COLUMN_SNIFF_BYTES))?;
				self.csv_from_bytes(bytes, Some(0))
			} else {
				self.csv_from_path(Some(0))
			};
			let df = parsed.map_err(|e| DimredError::TabularLoad {
				reason: e.to_string(),
			})?;
			Ok(column_names(&df))
		} else {
			let range = self.excel_range()?;
			Ok(header_names_of(&range))
		}
	}
}

impl ResourceAdapter for TabularAdapter {
	fn source(&self) -> &ResourceSource {
		&self.source
	}

	fn dataframe(&self) -> DimredResult<DataFrame> {
		self.validate_size_limit()?;
		if self.is_excel() {
			let range = self.excel_range()?;
			return range_to_dataframe(&range);
		}
		let parsed = if self.source.remote {
			let bytes = self.source.fetch_remote(&self.source.location, None)?;
			self.csv_from_bytes(bytes, None)
		} else {
			self.csv_from_path(None)
		};
		parsed.map_err(|e| DimredError::TabularLoad {
			reason: e.to_string(),
		})
	}

	fn columns(&self) -> DimredResult<Vec<String>> {
		match self.sniff_columns() {
			Ok(columns) => Ok(columns),
			// Fetch failures are real errors, not a reason to reparse
			Err(err @ DimredError::RemoteFetch { .. }) => Err(err),
			Err(err) => {
				warn!("Column read fallback to full load due to {err}");
				Ok(column_names(&self.dataframe()?))
			}
		}
	}
}

fn column_names(df: &DataFrame) -> Vec<String> {
	df.get_column_names().into_iter().map(String::from).collect()
}

fn first_sheet_range<R>(workbook: &mut calamine::Sheets<R>) -> DimredResult<Range<Data>>
where
	R: std::io::Read + std::io::Seek,
{
	let name = workbook
		.sheet_names()
		.first()
		.cloned()
		.ok_or_else(|| DimredError::TabularLoad {
			reason: "workbook has no sheets".to_string(),
		})?;
	workbook
		.worksheet_range(&name)
		.map_err(|e| DimredError::TabularLoad {
			reason: e.to_string(),
		})
}

fn header_cell(idx: usize, cell: &Data) -> String {
	match cell {
		Data::Empty => format!("unnamed_{idx}"),
		other => other.to_string(),
	}
}

fn header_names_of(range: &Range<Data>) -> Vec<String> {
	match range.rows().next() {
		Some(row) => row
			.iter()
			.enumerate()
			.map(|(idx, cell)| header_cell(idx, cell))
			.collect(),
		None => Vec::new(),
	}
}

/// Convert a worksheet range to a dataframe.
///
/// The first row is the header. A column is numeric when it holds at
/// least one int or float cell and nothing but int, float, or empty
/// cells; empty cells become nulls. Everything else is kept as text via
/// the cell's display form, so dates and booleans survive as strings.
fn range_to_dataframe(range: &Range<Data>) -> DimredResult<DataFrame> {
	let mut rows = range.rows();
	let Some(header_row) = rows.next() else {
		return Ok(DataFrame::empty());
	};
	let headers: Vec<String> = header_row
		.iter()
		.enumerate()
		.map(|(idx, cell)| header_cell(idx, cell))
		.collect();
	let body: Vec<&[Data]> = rows.collect();

	let mut columns = Vec::with_capacity(headers.len());
	for (idx, name) in headers.iter().enumerate() {
		let cells: Vec<&Data> = body.iter().map(|row| &row[idx]).collect();
		let has_number = cells
			.iter()
			.any(|c| matches!(c, Data::Int(_) | Data::Float(_)));
		let numeric = has_number
			&& cells
				.iter()
				.all(|c| matches!(c, Data::Int(_) | Data::Float(_) | Data::Empty));
		if numeric {
			let values: Vec<Option<f64>> = cells
				.iter()
				.map(|c| match c {
					Data::Int(i) => Some(*i as f64),
					Data::Float(f) => Some(*f),
					_ => None,
				})
				.collect();
			columns.push(Series::new(name.as_str(), values));
		} else {
			let values: Vec<Option<String>> = cells
				.iter()
				.map(|c| match c {
					Data::Empty => None,
					other => Some(other.to_string()),
				})
				.collect();
			columns.push(Series::new(name.as_str(), values));
		}
	}
	DataFrame::new(columns).map_err(DimredError::from)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::io::Write;

	fn csv_resource(format: &str) -> Resource {
		Resource {
			id: "res-1".to_string(),
			url: String::new(),
			format: format.to_string(),
			size: None,
			kind: String::new(),
		}
	}

	fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
		let path = dir.path().join(name);
		let mut file = std::fs::File::create(&path).unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		path
	}

	fn adapter_for(
		resource: &Resource,
		path: Option<PathBuf>,
		config: &DimredConfig,
	) -> Box<dyn ResourceAdapter> {
		TabularAdapter::create(resource, &ResourceView::default(), path, config).unwrap()
	}

	/// Serve a single canned HTTP response on a throwaway port.
	fn serve_once(status_line: &'static str, body: &'static str) -> String {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		std::thread::spawn(move || {
			if let Ok((mut stream, _)) = listener.accept() {
				let mut buf = [0u8; 4096];
				let _ = std::io::Read::read(&mut stream, &mut buf);
				let response = format!(
					"{status_line}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
					body.len()
				);
				let _ = stream.write_all(response.as_bytes());
			}
		});
		format!("http://{addr}/data.csv")
	}

	#[test_log::test]
	fn test_local_csv() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_temp(&dir, "data.csv", "a,b\n1,2\n3,4\n");
		let adapter = adapter_for(&csv_resource("CSV"), Some(path), &DimredConfig::default());

		assert!(!adapter.is_remote());
		let df = adapter.dataframe().unwrap();
		assert_eq!(df.height(), 2);
		assert_eq!(df.get_column_names(), &["a", "b"]);
		assert_eq!(adapter.columns().unwrap(), vec!["a", "b"]);
	}

	#[test_log::test]
	fn test_local_tsv() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_temp(&dir, "data.tsv", "x\ty\n1\t2\n");
		let adapter = adapter_for(&csv_resource("tsv"), Some(path), &DimredConfig::default());

		let df = adapter.dataframe().unwrap();
		assert_eq!(df.height(), 1);
		assert_eq!(adapter.columns().unwrap(), vec!["x", "y"]);
	}

	#[test_log::test]
	fn test_unknown_format_parses_as_csv() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_temp(&dir, "data.dat", "a,b\n1,2\n");
		let adapter = adapter_for(&csv_resource("dat"), Some(path), &DimredConfig::default());

		let df = adapter.dataframe().unwrap();
		assert_eq!(df.get_column_names(), &["a", "b"]);
		// Header sniff tries the workbook path first, fails, then falls
		// back to the full csv load
		assert_eq!(adapter.columns().unwrap(), vec!["a", "b"]);
	}

	#[test_log::test]
	fn test_size_limit_blocks_load_but_not_sniff() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_temp(&dir, "data.csv", "a,b\n1,2\n");
		let mut resource = csv_resource("csv");
		resource.size = Some(json!(2 * 1024 * 1024));
		let config = DimredConfig {
			max_file_size_mb: 1,
			..DimredConfig::default()
		};
		let adapter = adapter_for(&resource, Some(path), &config);

		let err = adapter.dataframe().unwrap_err();
		assert_eq!(
			err.to_string(),
			"Resource exceeds maximum allowed size for dimred processing: 1.0 MB"
		);
		// The header sniff does not consult the declared size
		assert_eq!(adapter.columns().unwrap(), vec!["a", "b"]);
	}

	#[test_log::test]
	fn test_remote_csv_fetch() {
		let url = serve_once("HTTP/1.1 200 OK", "a,b\n1,2\n3,4\n");
		let mut resource = csv_resource("csv");
		resource.url = url;
		resource.kind = "url".to_string();
		let adapter = adapter_for(&resource, None, &DimredConfig::default());

		assert!(adapter.is_remote());
		let df = adapter.dataframe().unwrap();
		assert_eq!(df.height(), 2);
		assert_eq!(df.get_column_names(), &["a", "b"]);
	}

	#[test_log::test]
	fn test_remote_column_sniff() {
		let url = serve_once("HTTP/1.1 200 OK", "a,b,c\n1,2,3\n");
		let mut resource = csv_resource("csv");
		resource.url = url;
		resource.kind = "url".to_string();
		let adapter = adapter_for(&resource, None, &DimredConfig::default());

		assert_eq!(adapter.columns().unwrap(), vec!["a", "b", "c"]);
	}

	#[test_log::test]
	fn test_remote_http_error() {
		let url = serve_once("HTTP/1.1 404 Not Found", "gone");
		let mut resource = csv_resource("csv");
		resource.url = url;
		resource.kind = "url".to_string();
		let adapter = adapter_for(&resource, None, &DimredConfig::default());

		let err = adapter.dataframe().unwrap_err();
		match &err {
			DimredError::RemoteFetch { reason } => assert!(reason.contains("404")),
			other => panic!("expected RemoteFetch, got {other:?}"),
		}
		// Sniffing propagates the fetch failure instead of reparsing
		assert!(matches!(
			adapter.columns(),
			Err(DimredError::RemoteFetch { .. })
		));
	}

	#[test]
	fn test_range_to_dataframe_types() {
		let mut range: Range<Data> = Range::new((0, 0), (3, 2));
		range.set_value((0, 0), Data::String("id".to_string()));
		range.set_value((0, 1), Data::String("score".to_string()));
		range.set_value((0, 2), Data::String("label".to_string()));
		range.set_value((1, 0), Data::Int(1));
		range.set_value((1, 1), Data::Float(0.5));
		range.set_value((1, 2), Data::String("a".to_string()));
		range.set_value((2, 0), Data::Int(2));
		// (2, 1) left empty becomes a null in a numeric column
		range.set_value((2, 2), Data::String("b".to_string()));
		range.set_value((3, 0), Data::Int(3));
		range.set_value((3, 1), Data::Float(1.5));
		range.set_value((3, 2), Data::Bool(true));

		let df = range_to_dataframe(&range).unwrap();
		assert_eq!(df.get_column_names(), &["id", "score", "label"]);
		assert_eq!(df.height(), 3);
		assert!(df.column("id").unwrap().dtype().is_numeric());
		assert!(df.column("score").unwrap().dtype().is_numeric());
		assert_eq!(df.column("score").unwrap().null_count(), 1);
		// The bool cell forces the label column to stay textual
		assert_eq!(df.column("label").unwrap().dtype(), &DataType::String);
	}

	#[test]
	fn test_range_headers() {
		let mut range: Range<Data> = Range::new((0, 0), (1, 1));
		range.set_value((0, 0), Data::String("a".to_string()));
		// (0, 1) left empty gets a positional name
		range.set_value((1, 0), Data::Int(1));
		range.set_value((1, 1), Data::Int(2));

		assert_eq!(header_names_of(&range), vec!["a", "unnamed_1"]);

		let empty: Range<Data> = Range::empty();
		assert!(header_names_of(&empty).is_empty());
		assert_eq!(range_to_dataframe(&empty).unwrap().height(), 0);
	}
}
