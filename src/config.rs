//! Pipeline configuration with serde-friendly defaults

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default parameters for the UMAP method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapDefaults {
	pub n_neighbors: usize,
	pub min_dist: f64,
	pub n_components: usize,
}

impl Default for UmapDefaults {
	fn default() -> Self {
		Self {
			n_neighbors: 15,
			min_dist: 0.1,
			n_components: 2,
		}
	}
}

/// Default parameters for the t-SNE method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneDefaults {
	pub perplexity: f64,
	pub n_components: usize,
}

impl Default for TsneDefaults {
	fn default() -> Self {
		Self {
			perplexity: 30.0,
			n_components: 2,
		}
	}
}

/// Default parameters for the PCA method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaDefaults {
	pub n_components: usize,
	pub whiten: bool,
}

impl Default for PcaDefaults {
	fn default() -> Self {
		Self {
			n_components: 2,
			whiten: false,
		}
	}
}

/// Configuration for the whole dimred pipeline.
///
/// Every field has a usable default, so a hosting application can
/// deserialize a partial config (or none at all) and only override what it
/// cares about. Method defaults here are the baseline that per-view
/// `method_params` are merged over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DimredConfig {
	/// Method used when a view does not name one
	pub default_method: String,
	/// Methods a view is allowed to request
	pub allowed_methods: Vec<String>,
	/// Base URL of the hosting site; same-site resource URLs resolve locally
	pub site_url: String,
	/// Upper bound on the declared resource size, in megabytes
	pub max_file_size_mb: u64,
	/// Row cap before deterministic sampling kicks in (0 disables the cap)
	pub max_rows: usize,
	/// Whether low-cardinality text columns become one-hot features
	pub enable_categorical: bool,
	/// Cardinality cutoff for one-hot encoding
	pub max_categories_for_ohe: usize,
	/// Whether computed previews are cached at all
	pub cache_enabled: bool,
	/// Cache entry lifetime in seconds
	pub cache_ttl_secs: u64,
	/// Whether CSV export of embeddings is offered
	pub export_enabled: bool,
	pub umap: UmapDefaults,
	pub tsne: TsneDefaults,
	pub pca: PcaDefaults,
}

impl Default for DimredConfig {
	fn default() -> Self {
		Self {
			default_method: "umap".to_string(),
			allowed_methods: vec![
				"umap".to_string(),
				"tsne".to_string(),
				"pca".to_string(),
			],
			site_url: String::new(),
			max_file_size_mb: 50,
			max_rows: 5000,
			enable_categorical: true,
			max_categories_for_ohe: 10,
			cache_enabled: true,
			cache_ttl_secs: 3600,
			export_enabled: true,
			umap: UmapDefaults::default(),
			tsne: TsneDefaults::default(),
			pca: PcaDefaults::default(),
		}
	}
}

impl DimredConfig {
	/// Parse a space-separated method list, as flat config files state it.
	pub fn method_list(raw: &str) -> Vec<String> {
		raw.split_whitespace().map(str::to_string).collect()
	}

	/// Whether the given method name is on the allow-list.
	pub fn allows(&self, method: &str) -> bool {
		self.allowed_methods.iter().any(|m| m == method)
	}

	pub fn max_file_size_bytes(&self) -> u64 {
		self.max_file_size_mb * 1024 * 1024
	}

	pub fn cache_ttl(&self) -> Duration {
		Duration::from_secs(self.cache_ttl_secs)
	}
}
