//! Main API for dimensionality-reduction previews

use std::path::PathBuf;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::adapters::AdapterRegistry;
use crate::cache::{settings_signature, PreviewCache};
use crate::config::DimredConfig;
use crate::data::{Embedding, ExportFile, PreviewMeta, PreviewResult, Resource, ResourceView};
use crate::error::{DimredError, DimredResult};
use crate::export;
use crate::features;
use crate::methods::MethodRegistry;

/// Maps a resource to a file on local disk, when the host keeps uploads
/// somewhere the pipeline can read directly instead of going through the URL.
pub type PathResolver = Box<dyn Fn(&Resource) -> Option<PathBuf> + Send + Sync>;

pub struct DimredPipeline {
    config: DimredConfig,
    adapters: AdapterRegistry,
    methods: MethodRegistry,
    cache: PreviewCache,
    path_resolver: Option<PathResolver>,
}

impl DimredPipeline {
    /// A pipeline with the built-in adapters and methods and no cache.
    pub fn new(config: DimredConfig) -> Self {
        Self {
            config,
            adapters: AdapterRegistry::new(),
            methods: MethodRegistry::new(),
            cache: PreviewCache::disabled(),
            path_resolver: None,
        }
    }

    pub fn with_cache(mut self, cache: PreviewCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_path_resolver(mut self, resolver: PathResolver) -> Self {
        self.path_resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &DimredConfig {
        &self.config
    }

    /// Registry of adapters, for hosts that plug in their own formats.
    pub fn adapters_mut(&mut self) -> &mut AdapterRegistry {
        &mut self.adapters
    }

    /// Registry of projection methods, for hosts that plug in their own.
    pub fn methods_mut(&mut self) -> &mut MethodRegistry {
        &mut self.methods
    }

    /// Compute (or fetch from cache) the preview embedding for one view.
    ///
    /// The cache key covers every setting that influences the output, so a
    /// hit is only served while the view and the relevant configuration are
    /// unchanged. Method validation runs on the miss path: a cached result
    /// for a since-disallowed method still serves until it is purged.
    pub fn preview(&self, resource: &Resource, view: &ResourceView) -> DimredResult<PreviewResult> {
        let method_params = validate_method_params(view.method_params.as_ref())?;
        let method = self.resolved_method(view);

        let settings = self.cache_settings(&method, &method_params, view);
        let signature = settings_signature(&settings);
        debug!("Pipeline: settings signature {signature} for {}/{}", resource.id, view.id);

        if let Some(hit) = self.cache.get(&resource.id, &view.id, &signature) {
            return Ok(hit);
        }

        let result = self.build_preview(resource, view, &method, &method_params)?;
        self.cache.save(&resource.id, &view.id, &signature, &result);
        Ok(result)
    }

    fn build_preview(
        &self,
        resource: &Resource,
        view: &ResourceView,
        method: &str,
        method_params: &Map<String, Value>,
    ) -> DimredResult<PreviewResult> {
        if !self.config.allows(method) {
            return Err(DimredError::validation(
                "method",
                format!("Method '{method}' is not allowed."),
            ));
        }
        let reducer = self.methods.create(method, &self.config, method_params)?;

        let filepath = self.resolve_path(resource);
        let prepared =
            features::prepare_from_resource(&self.adapters, resource, view, filepath, &self.config)?;
        info!(
            "Pipeline: prepared {}x{} matrix for {}/{} via {method}",
            prepared.info.n_rows_used, prepared.info.n_features, resource.id, view.id
        );

        let transformed = reducer.fit_transform(&prepared.values)?;
        let embedding: Embedding = transformed.outer_iter().map(|row| row.to_vec()).collect();

        Ok(PreviewResult {
            embedding,
            meta: PreviewMeta {
                method: method.to_string(),
                method_params: Value::Object(reducer.params().clone()),
                prepare_info: prepared.info,
            },
        })
    }

    /// Run the preview and package the embedding as a downloadable CSV.
    pub fn export_embedding(
        &self,
        resource: &Resource,
        view: &ResourceView,
    ) -> DimredResult<ExportFile> {
        if !self.config.export_enabled {
            return Err(DimredError::validation("export", "Dimred export is disabled."));
        }
        let result = self.preview(resource, view)?;
        if result.embedding.is_empty() {
            return Err(DimredError::NotEnoughFeatures);
        }
        let content = export::embedding_to_csv(&result.embedding, &result.meta)?;
        Ok(ExportFile {
            filename: format!("dimred-{}-{}.csv", resource.id, view.id),
            content,
            content_type: "text/csv; charset=utf-8".to_string(),
        })
    }

    /// Column names of the resource's table, for the view configuration form.
    pub fn columns(&self, resource: &Resource, view: &ResourceView) -> DimredResult<Vec<String>> {
        let factory = self.adapters.resolve(resource).ok_or_else(|| {
            DimredError::AdapterNotFound {
                format: resource.format.to_lowercase(),
            }
        })?;
        let adapter = factory(resource, view, self.resolve_path(resource), &self.config)?;
        adapter.columns()
    }

    /// Whether any registered adapter claims this resource.
    pub fn can_preview(&self, resource: &Resource) -> bool {
        self.adapters.resolve(resource).is_some()
    }

    /// Purge cached previews when a resource's data may have changed.
    ///
    /// A re-upload always invalidates; a metadata-only update keeps the
    /// cache warm as long as the URL is unchanged.
    pub fn resource_updated(&self, current: &Resource, updated: &Resource, has_upload: bool) {
        if has_upload || updated.url != current.url {
            info!("Pipeline: purging previews for updated resource {}", current.id);
            self.cache.delete_for_resource(&current.id);
        }
    }

    pub fn resource_deleted(&self, resource_id: &str) {
        info!("Pipeline: purging previews for deleted resource {resource_id}");
        self.cache.delete_for_resource(resource_id);
    }

    fn resolve_path(&self, resource: &Resource) -> Option<PathBuf> {
        self.path_resolver.as_ref().and_then(|resolve| resolve(resource))
    }

    fn resolved_method(&self, view: &ResourceView) -> String {
        let method = view.method.trim();
        if method.is_empty() {
            self.config.default_method.clone()
        } else {
            method.to_string()
        }
    }

    fn cache_settings(&self, method: &str, params: &Map<String, Value>, view: &ResourceView) -> Value {
        json!({
            "method": method,
            "method_params": params,
            "feature_columns": view.feature_columns,
            "color_by": view.color_by,
            "max_rows": self.config.max_rows,
            "enable_categorical": self.config.enable_categorical,
            "max_categories_for_ohe": self.config.max_categories_for_ohe,
        })
    }
}

/// Check a view's method against the configured allow-list.
///
/// An empty value passes so the config default can apply later.
pub fn validate_allowed_method(method: &str, config: &DimredConfig) -> DimredResult<()> {
    let method = method.trim();
    if method.is_empty() || config.allows(method) {
        return Ok(());
    }
    Err(DimredError::validation(
        "method",
        format!("Method '{method}' is not allowed."),
    ))
}

/// Normalize a view's `method_params` value into a parameter map.
///
/// Accepts an object directly, or a string holding a JSON object (form
/// submissions arrive this way). Absent, null, and blank values mean
/// "no overrides". Anything else is a validation error.
pub fn validate_method_params(raw: Option<&Value>) -> DimredResult<Map<String, Value>> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Map::new());
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(DimredError::validation(
                    "method_params",
                    "method_params must be a JSON object.",
                )),
                Err(_) => Err(DimredError::validation(
                    "method_params",
                    "Invalid JSON in method_params.",
                )),
            }
        }
        Some(_) => Err(DimredError::validation(
            "method_params",
            "method_params must be a JSON object.",
        )),
    }
}

/// Normalize a view's `feature_columns` value into a list of column names.
///
/// Accepts a JSON array, a string holding a JSON array, or a plain
/// comma-separated string. Absent, null, and blank values mean "use every
/// suitable column".
pub fn validate_feature_columns(raw: Option<&Value>) -> DimredResult<Option<Vec<String>>> {
    let invalid = || {
        DimredError::validation(
            "feature_columns",
            "feature_columns must be a list or comma-separated string.",
        )
    };
    let normalized = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => features::stringify_items(items),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => features::stringify_items(&items),
                Ok(_) => return Err(invalid()),
                Err(_) => trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            }
        }
        Some(_) => return Err(invalid()),
    };
    if normalized.is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}
