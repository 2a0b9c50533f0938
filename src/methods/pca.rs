//! Principal component analysis via power iteration

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};

use crate::config::DimredConfig;
use crate::error::{DimredError, DimredResult};
use crate::methods::{bool_param, merge_params, u64_param, usize_param, util, ProjectionMethod};

const POWER_ITERATIONS: usize = 100;
const CONVERGENCE_EPS: f64 = 1e-9;

/// PCA. Components are extracted one at a time by power iteration on the
/// covariance matrix with deflation between components, which keeps the
/// numerics dependency-free and deterministic for the seeded start vector.
pub struct Pca {
	params: Map<String, Value>,
	n_components: usize,
	whiten: bool,
	random_state: u64,
}

impl Pca {
	/// Factory with the registry's [`MethodFactory`] signature.
	///
	/// [`MethodFactory`]: crate::methods::MethodFactory
	pub fn from_params(
		config: &DimredConfig,
		caller: &Map<String, Value>,
	) -> DimredResult<Box<dyn ProjectionMethod>> {
		let mut defaults = Map::new();
		defaults.insert("n_components".to_string(), json!(config.pca.n_components));
		defaults.insert("whiten".to_string(), json!(config.pca.whiten));
		defaults.insert("random_state".to_string(), json!(42));
		let params = merge_params(defaults, caller);

		let n_components = usize_param(&params, "n_components")?;
		let whiten = bool_param(&params, "whiten")?;
		let random_state = u64_param(&params, "random_state")?;
		Ok(Box::new(Self {
			params,
			n_components,
			whiten,
			random_state,
		}))
	}
}

impl ProjectionMethod for Pca {
	fn name(&self) -> &'static str {
		"pca"
	}

	fn params(&self) -> &Map<String, Value> {
		&self.params
	}

	fn fit_transform(&self, data: &Array2<f64>) -> DimredResult<Array2<f64>> {
		let (transformed, eigenvalues) =
			power_pca(data, self.n_components, self.random_state)?;
		if !self.whiten {
			return Ok(transformed);
		}
		let mut whitened = transformed;
		for (j, eigenvalue) in eigenvalues.iter().enumerate() {
			if *eigenvalue > CONVERGENCE_EPS {
				let scale = eigenvalue.sqrt();
				for i in 0..whitened.nrows() {
					whitened[[i, j]] /= scale;
				}
			}
		}
		Ok(whitened)
	}
}

/// Project `data` onto its top principal components.
///
/// Returns the projected rows and the eigenvalue per component. Shared
/// with the UMAP initialization, which wants the projection but not the
/// whitening logic.
pub(crate) fn power_pca(
	data: &Array2<f64>,
	n_components: usize,
	random_state: u64,
) -> DimredResult<(Array2<f64>, Vec<f64>)> {
	let (n_samples, n_features) = data.dim();
	let max_rank = n_samples.min(n_features);
	if n_components == 0 || n_components > max_rank {
		return Err(DimredError::Projection {
			reason: format!(
				"n_components={} must be between 1 and min(n_samples, n_features)={}",
				n_components, max_rank
			),
		});
	}

	let centered = center(data);
	let mut covariance = covariance_of(&centered);
	let mut rng = StdRng::seed_from_u64(random_state);

	let mut components = Array2::<f64>::zeros((n_features, n_components));
	let mut eigenvalues = Vec::with_capacity(n_components);
	for c in 0..n_components {
		let component = dominant_eigenvector(&covariance, &mut rng);
		let eigenvalue = component.dot(&covariance.dot(&component));
		// Deflate so the next iteration finds the next component
		for a in 0..n_features {
			for b in 0..n_features {
				covariance[[a, b]] -= eigenvalue * component[a] * component[b];
			}
		}
		for (row, v) in component.iter().enumerate() {
			components[[row, c]] = *v;
		}
		eigenvalues.push(eigenvalue);
	}

	Ok((centered.dot(&components), eigenvalues))
}

fn center(data: &Array2<f64>) -> Array2<f64> {
	let n_rows = data.nrows();
	let mut centered = data.clone();
	if n_rows == 0 {
		return centered;
	}
	for j in 0..data.ncols() {
		let mean = (0..n_rows).map(|i| data[[i, j]]).sum::<f64>() / n_rows as f64;
		for i in 0..n_rows {
			centered[[i, j]] -= mean;
		}
	}
	centered
}

fn covariance_of(centered: &Array2<f64>) -> Array2<f64> {
	let (n_rows, n_cols) = centered.dim();
	let denom = (n_rows.saturating_sub(1)).max(1) as f64;
	let mut covariance = Array2::<f64>::zeros((n_cols, n_cols));
	for a in 0..n_cols {
		for b in a..n_cols {
			let mut sum = 0.0;
			for i in 0..n_rows {
				sum += centered[[i, a]] * centered[[i, b]];
			}
			let value = sum / denom;
			covariance[[a, b]] = value;
			covariance[[b, a]] = value;
		}
	}
	covariance
}

fn dominant_eigenvector(matrix: &Array2<f64>, rng: &mut StdRng) -> Array1<f64> {
	let dim = matrix.nrows();
	let mut v = Array1::from_shape_fn(dim, |_| util::normal(rng));
	let norm = v.dot(&v).sqrt();
	if norm > 0.0 {
		v /= norm;
	} else {
		v[0] = 1.0;
	}

	for _ in 0..POWER_ITERATIONS {
		let mut next = matrix.dot(&v);
		let norm = next.dot(&next).sqrt();
		if norm < CONVERGENCE_EPS {
			// Deflated to (numerically) zero, any unit vector will do
			break;
		}
		next /= norm;
		let delta = (&next - &v).dot(&(&next - &v));
		v = next;
		if delta < CONVERGENCE_EPS {
			break;
		}
	}
	v
}
