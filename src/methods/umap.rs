//! UMAP: fuzzy neighbor graph with a sampled stochastic layout

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::config::DimredConfig;
use crate::error::{DimredError, DimredResult};
use crate::methods::pca::power_pca;
use crate::methods::{f64_param, merge_params, u64_param, usize_param, util, ProjectionMethod};

const EPOCHS: usize = 200;
const NEGATIVE_SAMPLES: usize = 5;
const BANDWIDTH_SEARCH_ITERATIONS: usize = 64;
const GRAD_CLIP: f64 = 4.0;
const REPULSION_EPS: f64 = 0.001;
const INITIAL_SCALE: f64 = 10.0;

/// UMAP built from brute-force k-nearest neighbors, smoothed into a fuzzy
/// graph, and laid out by attraction along graph edges with negative
/// sampling for repulsion. Initialization projects through PCA so runs
/// are repeatable end to end.
pub struct Umap {
	params: Map<String, Value>,
	n_neighbors: usize,
	min_dist: f64,
	n_components: usize,
	random_state: u64,
}

impl Umap {
	/// Factory with the registry's [`MethodFactory`] signature.
	///
	/// [`MethodFactory`]: crate::methods::MethodFactory
	pub fn from_params(
		config: &DimredConfig,
		caller: &Map<String, Value>,
	) -> DimredResult<Box<dyn ProjectionMethod>> {
		let mut defaults = Map::new();
		defaults.insert("n_neighbors".to_string(), json!(config.umap.n_neighbors));
		defaults.insert("min_dist".to_string(), json!(config.umap.min_dist));
		defaults.insert("n_components".to_string(), json!(config.umap.n_components));
		defaults.insert("random_state".to_string(), json!(42));
		let params = merge_params(defaults, caller);

		let n_neighbors = usize_param(&params, "n_neighbors")?;
		let min_dist = f64_param(&params, "min_dist")?;
		let n_components = usize_param(&params, "n_components")?;
		let random_state = u64_param(&params, "random_state")?;
		Ok(Box::new(Self {
			params,
			n_neighbors,
			min_dist,
			n_components,
			random_state,
		}))
	}
}

impl ProjectionMethod for Umap {
	fn name(&self) -> &'static str {
		"umap"
	}

	fn params(&self) -> &Map<String, Value> {
		&self.params
	}

	fn fit_transform(&self, data: &Array2<f64>) -> DimredResult<Array2<f64>> {
		let n_samples = data.nrows();
		if n_samples < 2 {
			return Err(DimredError::Projection {
				reason: format!("UMAP needs at least 2 samples, got {n_samples}"),
			});
		}
		if self.n_components == 0 {
			return Err(DimredError::Projection {
				reason: "n_components must be at least 1".to_string(),
			});
		}
		if self.min_dist < 0.0 || self.n_neighbors == 0 {
			return Err(DimredError::Projection {
				reason: "n_neighbors must be positive and min_dist non-negative".to_string(),
			});
		}

		let k = self.n_neighbors.min(n_samples - 1);
		if k < self.n_neighbors {
			warn!(
				"UMAP: n_neighbors {} too large for {} samples, using {}",
				self.n_neighbors, n_samples, k
			);
		}

		let edges = fuzzy_graph_edges(data, k);
		let (a, b) = fit_ab(self.min_dist);

		let mut y = self.initial_embedding(data, n_samples);
		let mut rng = StdRng::seed_from_u64(self.random_state);
		let k_out = self.n_components;

		for epoch in 0..EPOCHS {
			let alpha = 1.0 - epoch as f64 / EPOCHS as f64;
			for &(i, j, w) in &edges {
				let mut d_sq = 0.0;
				for c in 0..k_out {
					let diff = y[[i, c]] - y[[j, c]];
					d_sq += diff * diff;
				}
				if d_sq > 0.0 {
					let coeff =
						(-2.0 * a * b * d_sq.powf(b - 1.0)) / (1.0 + a * d_sq.powf(b));
					for c in 0..k_out {
						let g = clip(coeff * (y[[i, c]] - y[[j, c]]));
						y[[i, c]] += alpha * w * g;
						y[[j, c]] -= alpha * w * g;
					}
				}

				for _ in 0..NEGATIVE_SAMPLES {
					let t = rng.random_range(0..n_samples);
					if t == i {
						continue;
					}
					let mut d_sq = 0.0;
					for c in 0..k_out {
						let diff = y[[i, c]] - y[[t, c]];
						d_sq += diff * diff;
					}
					let coeff = (2.0 * b)
						/ ((REPULSION_EPS + d_sq) * (1.0 + a * d_sq.powf(b)));
					for c in 0..k_out {
						let g = clip(coeff * (y[[i, c]] - y[[t, c]]));
						y[[i, c]] += alpha * g;
					}
				}
			}
		}

		Ok(y)
	}
}

impl Umap {
	/// PCA projection scaled into a small box, falling back to seeded
	/// noise when the data has too little rank to project.
	fn initial_embedding(&self, data: &Array2<f64>, n_samples: usize) -> Array2<f64> {
		match power_pca(data, self.n_components, self.random_state) {
			Ok((projected, _)) => {
				let max_abs = projected.iter().fold(0.0f64, |m, v| m.max(v.abs()));
				if max_abs > 0.0 {
					projected.mapv(|v| v * (INITIAL_SCALE / max_abs))
				} else {
					projected
				}
			}
			Err(_) => {
				let mut rng = StdRng::seed_from_u64(self.random_state);
				Array2::from_shape_fn((n_samples, self.n_components), |_| {
					INITIAL_SCALE * util::normal(&mut rng)
				})
			}
		}
	}
}

fn clip(v: f64) -> f64 {
	v.clamp(-GRAD_CLIP, GRAD_CLIP)
}

/// Build the symmetrized fuzzy graph as a sorted edge list.
///
/// Per point: brute-force k nearest neighbors, `rho` as the nearest
/// positive distance, and a bandwidth `sigma` found by binary search so
/// the smoothed neighbor weights sum to `log2(k)`. Directed weights are
/// combined with the fuzzy union `w + w' - w w'`. The edge list is in
/// index order, so the layout loop is deterministic.
fn fuzzy_graph_edges(data: &Array2<f64>, k: usize) -> Vec<(usize, usize, f64)> {
	let n = data.nrows();
	let sq = util::pairwise_sq_distances(data);
	let target = (k as f64).log2();

	let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
	for i in 0..n {
		let mut order: Vec<(f64, usize)> = (0..n)
			.filter(|&j| j != i)
			.map(|j| (sq[[i, j]].sqrt(), j))
			.collect();
		order.sort_by(|x, y| {
			x.0.partial_cmp(&y.0)
				.unwrap_or(Ordering::Equal)
				.then(x.1.cmp(&y.1))
		});
		order.truncate(k);

		let rho = order
			.iter()
			.map(|(d, _)| *d)
			.find(|d| *d > 0.0)
			.unwrap_or(0.0);

		let mut lo = 1e-8;
		let mut hi = 1000.0;
		let mut sigma = 1.0;
		for _ in 0..BANDWIDTH_SEARCH_ITERATIONS {
			sigma = (lo + hi) / 2.0;
			let sum: f64 = order
				.iter()
				.map(|(d, _)| (-((d - rho).max(0.0)) / sigma).exp())
				.sum();
			if sum > target {
				hi = sigma;
			} else {
				lo = sigma;
			}
		}

		for (d, j) in &order {
			let w = (-((d - rho).max(0.0)) / sigma).exp();
			directed.insert((i, *j), w);
		}
	}

	let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
	for &(i, j) in directed.keys() {
		pairs.insert(if i < j { (i, j) } else { (j, i) });
	}
	pairs
		.into_iter()
		.map(|(i, j)| {
			let w_ij = directed.get(&(i, j)).copied().unwrap_or(0.0);
			let w_ji = directed.get(&(j, i)).copied().unwrap_or(0.0);
			(i, j, w_ij + w_ji - w_ij * w_ji)
		})
		.collect()
}

/// Fit the layout curve `1 / (1 + a d^(2b))` to the membership decay
/// implied by `min_dist`, by least squares over a coarse parameter grid.
fn fit_ab(min_dist: f64) -> (f64, f64) {
	const SAMPLES: usize = 300;
	const MAX_DISTANCE: f64 = 3.0;

	let target: Vec<(f64, f64)> = (0..SAMPLES)
		.map(|s| {
			let d = MAX_DISTANCE * (s as f64 + 0.5) / SAMPLES as f64;
			let t = if d <= min_dist {
				1.0
			} else {
				(-(d - min_dist)).exp()
			};
			(d, t)
		})
		.collect();

	let mut best = (1.0, 1.0);
	let mut best_err = f64::INFINITY;
	let mut a = 0.05;
	while a <= 3.0 {
		let mut b = 0.3;
		while b <= 2.5 {
			let err: f64 = target
				.iter()
				.map(|&(d, t)| {
					let v = 1.0 / (1.0 + a * d.powf(2.0 * b));
					(v - t) * (v - t)
				})
				.sum();
			if err < best_err {
				best_err = err;
				best = (a, b);
			}
			b += 0.05;
		}
		a += 0.05;
	}
	best
}
