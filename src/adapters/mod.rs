//! Resource adapters: resolving a resource to loadable tabular data

pub mod tabular;

pub use tabular::TabularAdapter;

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use polars::prelude::DataFrame;
use tracing::debug;

use crate::config::DimredConfig;
use crate::data::{Resource, ResourceView};
use crate::error::{DimredError, DimredResult};
use crate::summary::printable_file_size;

/// Timeout applied to every remote fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Loads tabular data for one resolved resource.
///
/// Implementations embed a [`ResourceSource`] for the shared concerns
/// (remote detection, size limits, fetching) and add format-specific
/// parsing on top.
pub trait ResourceAdapter: Send {
	/// Resolution state shared by all adapters.
	fn source(&self) -> &ResourceSource;

	/// Whether the data lives behind an HTTP URL rather than a local path.
	fn is_remote(&self) -> bool {
		self.source().remote
	}

	/// Enforce the configured size limit against the declared size.
	fn validate_size_limit(&self) -> DimredResult<()> {
		self.source().validate_size_limit()
	}

	/// Load the full table.
	fn dataframe(&self) -> DimredResult<DataFrame>;

	/// Column names only, cheaper than a full load where the format allows.
	fn columns(&self) -> DimredResult<Vec<String>>;
}

/// Constructor signature every registered adapter provides.
pub type AdapterFactory = fn(
	&Resource,
	&ResourceView,
	Option<PathBuf>,
	&DimredConfig,
) -> DimredResult<Box<dyn ResourceAdapter>>;

/// Outcome of one resolver callback.
pub enum AdapterResolution {
	/// No opinion, ask the next resolver
	Undecided,
	/// This resource must not be previewed at all
	Reject,
	/// Use this adapter, skipping the format table
	Use(AdapterFactory),
}

/// Callback consulted before the format table during resolution.
pub type AdapterResolver = Box<dyn Fn(&Resource) -> AdapterResolution + Send + Sync>;

/// Maps resource formats to adapter constructors.
///
/// ## Resolution Order
///
/// 1. Registered resolvers run in registration order. The first one that
///    answers [`AdapterResolution::Use`] or [`AdapterResolution::Reject`]
///    decides; `Undecided` falls through.
/// 2. Otherwise the resource format, lowercased, is looked up in the
///    format table.
///
/// Resolvers let a hosting application route specific resources to custom
/// adapters (or block them) without touching format registrations.
///
/// ## Built-in Formats
///
/// [`AdapterRegistry::new`] seeds `csv`, `tsv`, `xls` and `xlsx`, all
/// served by [`TabularAdapter`]. [`AdapterRegistry::empty`] starts blank
/// for hosts that want full control.
pub struct AdapterRegistry {
	formats: HashMap<String, AdapterFactory>,
	resolvers: Vec<AdapterResolver>,
}

impl AdapterRegistry {
	/// Registry with the built-in tabular formats.
	pub fn new() -> Self {
		let mut registry = Self::empty();
		for format in ["csv", "tsv", "xls", "xlsx"] {
			registry.register(format, TabularAdapter::create);
		}
		registry
	}

	/// Registry with no formats and no resolvers.
	pub fn empty() -> Self {
		Self {
			formats: HashMap::new(),
			resolvers: Vec::new(),
		}
	}

	/// Register (or replace) the factory for a format. Keys are lowercased.
	pub fn register(&mut self, format: &str, factory: AdapterFactory) {
		self.formats.insert(format.to_lowercase(), factory);
	}

	/// Append a resolver. Resolvers run before the format table.
	pub fn add_resolver(&mut self, resolver: AdapterResolver) {
		self.resolvers.push(resolver);
	}

	pub fn contains(&self, format: &str) -> bool {
		self.formats.contains_key(&format.to_lowercase())
	}

	/// Resolve a resource to an adapter factory, if any applies.
	pub fn resolve(&self, resource: &Resource) -> Option<AdapterFactory> {
		for resolver in &self.resolvers {
			match resolver(resource) {
				AdapterResolution::Undecided => continue,
				AdapterResolution::Reject => {
					debug!("Adapter: resolver rejected resource {}", resource.id);
					return None;
				}
				AdapterResolution::Use(factory) => return Some(factory),
			}
		}
		self.formats.get(&resource.format.to_lowercase()).copied()
	}
}

impl Default for AdapterRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for AdapterRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut formats: Vec<&str> = self.formats.keys().map(String::as_str).collect();
		formats.sort_unstable();
		f.debug_struct("AdapterRegistry")
			.field("formats", &formats)
			.field("resolvers", &self.resolvers.len())
			.finish()
	}
}

/// Where a resource's bytes actually live, plus the limits that apply.
///
/// A resource is local when the host hands over a filesystem path, when it
/// is an upload, or when its URL points back at the hosting site itself.
/// Everything else is remote and gets fetched over HTTP.
#[derive(Debug, Clone)]
pub struct ResourceSource {
	pub resource: Resource,
	pub remote: bool,
	/// URL when remote, filesystem path when local
	pub location: String,
	max_file_size_mb: u64,
}

impl ResourceSource {
	/// Classify a resource as local or remote.
	///
	/// An explicit `filepath` wins unconditionally. Otherwise the URL is
	/// required, the resource kind is honored ("upload" is local, "url" is
	/// remote), and as a last resort URLs under the configured site URL
	/// count as local.
	pub fn resolve(
		resource: &Resource,
		filepath: Option<PathBuf>,
		config: &DimredConfig,
	) -> DimredResult<Self> {
		if let Some(path) = filepath {
			return Ok(Self {
				resource: resource.clone(),
				remote: false,
				location: path.to_string_lossy().into_owned(),
				max_file_size_mb: config.max_file_size_mb,
			});
		}

		let url = resource.url.trim();
		if url.is_empty() {
			return Err(DimredError::EmptyUrl);
		}

		let remote = match resource.kind.as_str() {
			"upload" => false,
			"url" => true,
			// An unset site URL would prefix-match everything
			_ => config.site_url.is_empty() || !url.starts_with(&config.site_url),
		};

		Ok(Self {
			resource: resource.clone(),
			remote,
			location: url.to_string(),
			max_file_size_mb: config.max_file_size_mb,
		})
	}

	/// Reject resources whose declared size exceeds the configured limit.
	///
	/// Resources without a usable declared size pass; the limit is a
	/// cheap pre-check, not a guarantee about the actual payload.
	pub fn validate_size_limit(&self) -> DimredResult<()> {
		let Some(declared) = self.resource.declared_size_bytes() else {
			return Ok(());
		};
		let max_bytes = self.max_file_size_mb * 1024 * 1024;
		if declared > max_bytes as i64 {
			return Err(DimredError::SizeExceeded {
				max: printable_file_size(max_bytes),
			});
		}
		Ok(())
	}

	/// Fetch a remote resource, optionally stopping after `max_bytes`.
	///
	/// Any transport or HTTP-status failure maps to
	/// [`DimredError::RemoteFetch`] with the underlying reason.
	pub fn fetch_remote(&self, url: &str, max_bytes: Option<usize>) -> DimredResult<Vec<u8>> {
		debug!("Adapter: fetching {} (limit: {:?})", url, max_bytes);
		let client = reqwest::blocking::Client::builder()
			.timeout(DEFAULT_TIMEOUT)
			.build()
			.map_err(|e| DimredError::RemoteFetch {
				reason: e.to_string(),
			})?;
		let response = client
			.get(url)
			.send()
			.and_then(|r| r.error_for_status())
			.map_err(|e| DimredError::RemoteFetch {
				reason: e.to_string(),
			})?;

		let mut buf = Vec::new();
		let read = match max_bytes {
			Some(limit) => response.take(limit as u64).read_to_end(&mut buf),
			None => {
				let mut response = response;
				response.read_to_end(&mut buf)
			}
		};
		read.map_err(|e| DimredError::RemoteFetch {
			reason: e.to_string(),
		})?;
		Ok(buf)
	}
}
