//! t-SNE in its classic quadratic form

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};

use crate::config::DimredConfig;
use crate::error::{DimredError, DimredResult};
use crate::methods::{f64_param, merge_params, u64_param, usize_param, util, ProjectionMethod};

const MAX_ITER: usize = 500;
const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_CUTOFF: usize = 250;
const LEARNING_RATE: f64 = 200.0;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const ENTROPY_TOLERANCE: f64 = 1e-5;
const MIN_PROBABILITY: f64 = 1e-12;

/// t-SNE with exact pairwise affinities, random initialization, early
/// exaggeration and momentum. Quadratic in the number of samples, which
/// the row-sampling step upstream keeps within reason.
pub struct Tsne {
	params: Map<String, Value>,
	perplexity: f64,
	n_components: usize,
	random_state: u64,
}

impl Tsne {
	/// Factory with the registry's [`MethodFactory`] signature.
	///
	/// [`MethodFactory`]: crate::methods::MethodFactory
	pub fn from_params(
		config: &DimredConfig,
		caller: &Map<String, Value>,
	) -> DimredResult<Box<dyn ProjectionMethod>> {
		let mut defaults = Map::new();
		defaults.insert("perplexity".to_string(), json!(config.tsne.perplexity));
		defaults.insert("n_components".to_string(), json!(config.tsne.n_components));
		defaults.insert("random_state".to_string(), json!(42));
		let params = merge_params(defaults, caller);

		let perplexity = f64_param(&params, "perplexity")?;
		let n_components = usize_param(&params, "n_components")?;
		let random_state = u64_param(&params, "random_state")?;
		Ok(Box::new(Self {
			params,
			perplexity,
			n_components,
			random_state,
		}))
	}
}

impl ProjectionMethod for Tsne {
	fn name(&self) -> &'static str {
		"tsne"
	}

	fn params(&self) -> &Map<String, Value> {
		&self.params
	}

	fn fit_transform(&self, data: &Array2<f64>) -> DimredResult<Array2<f64>> {
		let n_samples = data.nrows();
		if self.n_components == 0 {
			return Err(DimredError::Projection {
				reason: "n_components must be at least 1".to_string(),
			});
		}
		if self.perplexity <= 0.0 || self.perplexity >= n_samples as f64 {
			return Err(DimredError::Projection {
				reason: format!(
					"perplexity ({}) must be positive and less than n_samples ({})",
					self.perplexity, n_samples
				),
			});
		}

		let distances = util::pairwise_sq_distances(data);
		let p = joint_probabilities(&distances, self.perplexity);

		let k = self.n_components;
		let mut rng = StdRng::seed_from_u64(self.random_state);
		let mut y =
			Array2::from_shape_fn((n_samples, k), |_| 1e-4 * util::normal(&mut rng));
		let mut velocity = Array2::<f64>::zeros((n_samples, k));

		for iter in 0..MAX_ITER {
			let exaggeration = if iter < EXAGGERATION_CUTOFF {
				EARLY_EXAGGERATION
			} else {
				1.0
			};
			let momentum = if iter < EXAGGERATION_CUTOFF {
				INITIAL_MOMENTUM
			} else {
				FINAL_MOMENTUM
			};

			// Student-t affinities in the embedding space
			let mut q_unnorm = Array2::<f64>::zeros((n_samples, n_samples));
			let mut q_sum = 0.0;
			for i in 0..n_samples {
				for j in (i + 1)..n_samples {
					let mut d = 0.0;
					for c in 0..k {
						let diff = y[[i, c]] - y[[j, c]];
						d += diff * diff;
					}
					let q = 1.0 / (1.0 + d);
					q_unnorm[[i, j]] = q;
					q_unnorm[[j, i]] = q;
					q_sum += 2.0 * q;
				}
			}
			let q_sum = q_sum.max(MIN_PROBABILITY);

			let mut grad = Array2::<f64>::zeros((n_samples, k));
			for i in 0..n_samples {
				for j in 0..n_samples {
					if i == j {
						continue;
					}
					let q_ij = (q_unnorm[[i, j]] / q_sum).max(MIN_PROBABILITY);
					let mult = (exaggeration * p[[i, j]] - q_ij) * q_unnorm[[i, j]];
					for c in 0..k {
						grad[[i, c]] += 4.0 * mult * (y[[i, c]] - y[[j, c]]);
					}
				}
			}

			for i in 0..n_samples {
				for c in 0..k {
					velocity[[i, c]] =
						momentum * velocity[[i, c]] - LEARNING_RATE * grad[[i, c]];
					y[[i, c]] += velocity[[i, c]];
				}
			}

			// Keep the embedding centered so it cannot drift away
			for c in 0..k {
				let mean = (0..n_samples).map(|i| y[[i, c]]).sum::<f64>() / n_samples as f64;
				for i in 0..n_samples {
					y[[i, c]] -= mean;
				}
			}
		}

		Ok(y)
	}
}

/// Symmetrized input affinities with per-point bandwidths found by binary
/// search so every conditional distribution hits the target perplexity.
fn joint_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
	let n = distances.nrows();
	let target_entropy = perplexity.ln();
	let mut conditional = Array2::<f64>::zeros((n, n));

	for i in 0..n {
		let mut beta = 1.0;
		let mut beta_min = f64::NEG_INFINITY;
		let mut beta_max = f64::INFINITY;
		let mut row = vec![0.0; n];

		for _ in 0..50 {
			let mut sum = 0.0;
			for j in 0..n {
				if j == i {
					row[j] = 0.0;
					continue;
				}
				row[j] = (-distances[[i, j]] * beta).exp();
				sum += row[j];
			}
			let sum = sum.max(MIN_PROBABILITY);
			let mut weighted = 0.0;
			for j in 0..n {
				weighted += distances[[i, j]] * row[j];
			}
			let entropy = sum.ln() + beta * weighted / sum;
			let diff = entropy - target_entropy;
			if diff.abs() < ENTROPY_TOLERANCE {
				break;
			}
			if diff > 0.0 {
				beta_min = beta;
				beta = if beta_max.is_finite() {
					(beta + beta_max) / 2.0
				} else {
					beta * 2.0
				};
			} else {
				beta_max = beta;
				beta = if beta_min.is_finite() {
					(beta + beta_min) / 2.0
				} else {
					beta / 2.0
				};
			}
		}

		let sum: f64 = row.iter().sum::<f64>().max(MIN_PROBABILITY);
		for j in 0..n {
			conditional[[i, j]] = row[j] / sum;
		}
	}

	let mut joint = Array2::<f64>::zeros((n, n));
	for i in 0..n {
		for j in 0..n {
			if i == j {
				continue;
			}
			joint[[i, j]] =
				((conditional[[i, j]] + conditional[[j, i]]) / (2.0 * n as f64))
					.max(MIN_PROBABILITY);
		}
	}
	joint
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fit(data: &Array2<f64>, params: Value) -> DimredResult<Array2<f64>> {
		let caller = params.as_object().cloned().unwrap_or_default();
		let method = Tsne::from_params(&DimredConfig::default(), &caller)?;
		method.fit_transform(data)
	}

	fn two_clusters() -> Array2<f64> {
		// Six points near the origin, six near (50, 50, 50, 50)
		let mut data = Array2::zeros((12, 4));
		for i in 0..12 {
			let offset = if i < 6 { 0.0 } else { 50.0 };
			let jitter = (i % 3) as f64 * 0.3;
			for c in 0..4 {
				data[[i, c]] = offset + jitter + (c as f64) * 0.1;
			}
		}
		data
	}

	#[test]
	fn test_perplexity_must_fit_sample_count() {
		let data = Array2::zeros((5, 3));
		// Default perplexity of 30 cannot work with 5 samples
		let err = fit(&data, serde_json::json!({})).unwrap_err();
		match err {
			DimredError::Projection { reason } => assert!(reason.contains("perplexity")),
			other => panic!("expected Projection, got {other:?}"),
		}

		let err = fit(&data, serde_json::json!({"perplexity": 0})).unwrap_err();
		assert!(matches!(err, DimredError::Projection { .. }));
	}

	#[test]
	fn test_shape_and_determinism() {
		let data = two_clusters();
		let first = fit(&data, serde_json::json!({"perplexity": 3})).unwrap();
		let second = fit(&data, serde_json::json!({"perplexity": 3})).unwrap();
		assert_eq!(first.dim(), (12, 2));
		assert_eq!(first, second);
		assert!(first.iter().all(|v| v.is_finite()));
	}

	#[test]
	fn test_three_components() {
		let data = two_clusters();
		let embedded =
			fit(&data, serde_json::json!({"perplexity": 3, "n_components": 3})).unwrap();
		assert_eq!(embedded.dim(), (12, 3));
	}

	#[test]
	fn test_separated_clusters_stay_separated() {
		let data = two_clusters();
		let embedded = fit(&data, serde_json::json!({"perplexity": 3})).unwrap();

		let centroid = |range: std::ops::Range<usize>| -> [f64; 2] {
			let mut c = [0.0, 0.0];
			let len = range.len() as f64;
			for i in range {
				c[0] += embedded[[i, 0]] / len;
				c[1] += embedded[[i, 1]] / len;
			}
			c
		};
		let a = centroid(0..6);
		let b = centroid(6..12);
		let between = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();

		let spread = |range: std::ops::Range<usize>, c: [f64; 2]| -> f64 {
			range
				.map(|i| {
					((embedded[[i, 0]] - c[0]).powi(2) + (embedded[[i, 1]] - c[1]).powi(2))
						.sqrt()
				})
				.fold(0.0, f64::max)
		};
		let max_spread = spread(0..6, a).max(spread(6..12, b));
		assert!(
			between > max_spread,
			"clusters overlap: between={between}, spread={max_spread}"
		);
	}

	#[test]
	fn test_merged_params_surface() {
		let caller = serde_json::json!({"perplexity": 5.0})
			.as_object()
			.cloned()
			.unwrap();
		let method = Tsne::from_params(&DimredConfig::default(), &caller).unwrap();
		assert_eq!(method.params()["perplexity"], serde_json::json!(5.0));
		assert_eq!(method.params()["n_components"], serde_json::json!(2));
		assert_eq!(method.params()["random_state"], serde_json::json!(42));
	}
}
