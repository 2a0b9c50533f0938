//! Projection methods: the trait, the registry, and parameter merging

pub mod pca;
pub mod tsne;
pub mod umap;

pub use pca::Pca;
pub use tsne::Tsne;
pub use umap::Umap;

use std::collections::HashMap;

use ndarray::Array2;
use serde_json::{Map, Value};

use crate::config::DimredConfig;
use crate::error::{DimredError, DimredResult};

/// A dimensionality-reduction method over a prepared feature matrix.
///
/// Implementations are constructed through a [`MethodFactory`] that merges
/// caller parameters over configured defaults. The merged set stays
/// available through [`ProjectionMethod::params`] and is what lands in the
/// preview metadata, including keys the method itself never reads.
pub trait ProjectionMethod: Send {
	fn name(&self) -> &'static str;

	/// Effective parameters after the merge.
	fn params(&self) -> &Map<String, Value>;

	/// Project rows of `data` into the method's output space.
	fn fit_transform(&self, data: &Array2<f64>) -> DimredResult<Array2<f64>>;
}

/// Constructor signature every registered method provides.
pub type MethodFactory =
	fn(&DimredConfig, &Map<String, Value>) -> DimredResult<Box<dyn ProjectionMethod>>;

/// Merge caller parameters over defaults. Null values are skipped, so a
/// form that submits `{"perplexity": null}` falls back to the default;
/// unknown keys are kept and travel into the metadata untouched.
pub fn merge_params(
	mut defaults: Map<String, Value>,
	caller: &Map<String, Value>,
) -> Map<String, Value> {
	for (key, value) in caller {
		if value.is_null() {
			continue;
		}
		defaults.insert(key.clone(), value.clone());
	}
	defaults
}

fn param_error(key: &str, expected: &str) -> DimredError {
	DimredError::validation("method_params", format!("Parameter '{key}' must be {expected}."))
}

pub(crate) fn usize_param(params: &Map<String, Value>, key: &str) -> DimredResult<usize> {
	params
		.get(key)
		.and_then(Value::as_u64)
		.map(|v| v as usize)
		.ok_or_else(|| param_error(key, "a non-negative integer"))
}

pub(crate) fn u64_param(params: &Map<String, Value>, key: &str) -> DimredResult<u64> {
	params
		.get(key)
		.and_then(Value::as_u64)
		.ok_or_else(|| param_error(key, "a non-negative integer"))
}

pub(crate) fn f64_param(params: &Map<String, Value>, key: &str) -> DimredResult<f64> {
	params
		.get(key)
		.and_then(Value::as_f64)
		.ok_or_else(|| param_error(key, "a number"))
}

pub(crate) fn bool_param(params: &Map<String, Value>, key: &str) -> DimredResult<bool> {
	params
		.get(key)
		.and_then(Value::as_bool)
		.ok_or_else(|| param_error(key, "a boolean"))
}

/// Maps method names to factories.
#[derive(Debug)]
pub struct MethodRegistry {
	factories: HashMap<String, MethodFactory>,
}

impl MethodRegistry {
	/// Registry with the built-in methods: umap, tsne, pca.
	pub fn new() -> Self {
		let mut registry = Self::empty();
		registry.register("umap", Umap::from_params);
		registry.register("tsne", Tsne::from_params);
		registry.register("pca", Pca::from_params);
		registry
	}

	pub fn empty() -> Self {
		Self {
			factories: HashMap::new(),
		}
	}

	pub fn register(&mut self, name: &str, factory: MethodFactory) {
		self.factories.insert(name.to_string(), factory);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.factories.contains_key(name)
	}

	/// Registered names, sorted for stable error messages.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.factories.keys().cloned().collect();
		names.sort_unstable();
		names
	}

	/// Instantiate a method with caller params merged over defaults.
	pub fn create(
		&self,
		name: &str,
		config: &DimredConfig,
		params: &Map<String, Value>,
	) -> DimredResult<Box<dyn ProjectionMethod>> {
		let factory = self.factories.get(name).ok_or_else(|| {
			DimredError::validation(
				"method",
				format!(
					"Unknown method '{}', expected one of: {}",
					name,
					self.names().join(", ")
				),
			)
		})?;
		factory(config, params)
	}
}

impl Default for MethodRegistry {
	fn default() -> Self {
		Self::new()
	}
}

pub(crate) mod util {
	use ndarray::Array2;
	use rand::rngs::StdRng;
	use rand::Rng;

	/// Squared euclidean distance between every row pair.
	pub fn pairwise_sq_distances(data: &Array2<f64>) -> Array2<f64> {
		let n = data.nrows();
		let mut distances = Array2::zeros((n, n));
		for i in 0..n {
			for j in (i + 1)..n {
				let mut d = 0.0;
				for k in 0..data.ncols() {
					let diff = data[[i, k]] - data[[j, k]];
					d += diff * diff;
				}
				distances[[i, j]] = d;
				distances[[j, i]] = d;
			}
		}
		distances
	}

	/// One standard-normal draw (Box-Muller).
	pub fn normal(rng: &mut StdRng) -> f64 {
		let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
		let u2: f64 = rng.random();
		(-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::array;
	use rand::rngs::StdRng;
	use rand::SeedableRng;
	use serde_json::json;

	fn map_of(value: Value) -> Map<String, Value> {
		value.as_object().unwrap().clone()
	}

	#[test]
	fn test_merge_skips_nulls_and_keeps_unknown_keys() {
		let defaults = map_of(json!({"n_components": 2, "whiten": false}));
		let caller = map_of(json!({
			"n_components": 3,
			"whiten": null,
			"custom_flag": "kept"
		}));
		let merged = merge_params(defaults, &caller);
		assert_eq!(merged["n_components"], json!(3));
		assert_eq!(merged["whiten"], json!(false));
		assert_eq!(merged["custom_flag"], json!("kept"));
	}

	#[test]
	fn test_typed_param_extractors() {
		let params = map_of(json!({
			"n_components": 2,
			"perplexity": 30,
			"min_dist": 0.1,
			"whiten": true
		}));
		assert_eq!(usize_param(&params, "n_components").unwrap(), 2);
		// Integers read fine as floats
		assert_eq!(f64_param(&params, "perplexity").unwrap(), 30.0);
		assert_eq!(f64_param(&params, "min_dist").unwrap(), 0.1);
		assert!(bool_param(&params, "whiten").unwrap());

		let bad = map_of(json!({"n_components": "two"}));
		let err = usize_param(&bad, "n_components").unwrap_err();
		assert_eq!(
			err.to_string(),
			"Parameter 'n_components' must be a non-negative integer."
		);
	}

	#[test]
	fn test_registry_has_builtins() {
		let registry = MethodRegistry::new();
		assert!(registry.contains("umap"));
		assert!(registry.contains("tsne"));
		assert!(registry.contains("pca"));
		assert_eq!(registry.names(), vec!["pca", "tsne", "umap"]);
	}

	#[test]
	fn test_registry_unknown_method() {
		let registry = MethodRegistry::new();
		let err = registry
			.create("abc", &DimredConfig::default(), &Map::new())
			.err()
			.unwrap();
		assert_eq!(
			err.to_string(),
			"Unknown method 'abc', expected one of: pca, tsne, umap"
		);
	}

	#[test]
	fn test_registry_custom_registration() {
		let mut registry = MethodRegistry::empty();
		assert!(!registry.contains("pca"));
		registry.register("pca", Pca::from_params);
		let method = registry
			.create("pca", &DimredConfig::default(), &Map::new())
			.unwrap();
		assert_eq!(method.name(), "pca");
	}

	#[test]
	fn test_pairwise_sq_distances() {
		let data = array![[0.0, 0.0], [3.0, 4.0], [0.0, 1.0]];
		let distances = util::pairwise_sq_distances(&data);
		assert_eq!(distances[[0, 0]], 0.0);
		assert_eq!(distances[[0, 1]], 25.0);
		assert_eq!(distances[[1, 0]], 25.0);
		assert_eq!(distances[[0, 2]], 1.0);
		assert_eq!(distances[[1, 2]], 18.0);
	}

	#[test]
	fn test_normal_draws_are_seed_deterministic() {
		let mut a = StdRng::seed_from_u64(7);
		let mut b = StdRng::seed_from_u64(7);
		for _ in 0..16 {
			let x = util::normal(&mut a);
			assert_eq!(x, util::normal(&mut b));
			assert!(x.is_finite());
		}
	}
}
