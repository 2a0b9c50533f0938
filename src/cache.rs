//! Preview cache: TTL'd key-value storage behind a swallow-all facade

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::DimredConfig;
use crate::data::PreviewResult;
use crate::error::{CacheError, CacheResult};

/// Prefix shared by every cache key.
pub const KEY_PREFIX: &str = "dimred:preview";

/// Hash of the preview settings, used as the cache key discriminator.
///
/// `serde_json` keeps object keys sorted (map entries are BTreeMap-backed),
/// so the compact rendering is canonical: the same settings always produce
/// the same signature regardless of insertion order.
pub fn settings_signature(settings: &Value) -> String {
	let mut hasher = Sha256::new();
	hasher.update(settings.to_string().as_bytes());
	hex::encode(hasher.finalize())
}

/// Cache key for one (resource, view, settings) triple.
pub fn preview_key(resource_id: &str, view_id: &str, signature: &str) -> String {
	format!("{KEY_PREFIX}:{resource_id}:{view_id}:{signature}")
}

/// Key prefix owned by one resource, for invalidation scans.
fn resource_prefix(resource_id: &str) -> String {
	format!("{KEY_PREFIX}:{resource_id}:")
}

/// Minimal TTL-capable key-value store.
///
/// The pipeline only needs get, set-with-expiry, and prefix deletion, so
/// hosts can back this with whatever store they already run.
pub trait CacheStore: Send + Sync {
	fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
	fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;
	/// Remove every key starting with `prefix`, returning how many.
	fn delete_prefix(&self, prefix: &str) -> CacheResult<usize>;
}

/// On-disk envelope: payload plus its absolute expiry time.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
	expires_at: i64,
	value: Vec<u8>,
}

fn now_epoch_secs() -> i64 {
	chrono::Utc::now().timestamp()
}

/// Sled-backed store. Sled has no native expiry, so every record carries
/// its own deadline and expired records are dropped lazily on read.
pub struct SledStore {
	db: sled::Db,
}

impl SledStore {
	pub fn open(path: &Path) -> CacheResult<Self> {
		let db = sled::open(path)?;
		Ok(Self { db })
	}
}

impl CacheStore for SledStore {
	fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
		let Some(raw) = self.db.get(key)? else {
			return Ok(None);
		};
		let record: StoredRecord =
			bincode::deserialize(&raw).map_err(|_| CacheError::Corrupted {
				key: key.to_string(),
			})?;
		if now_epoch_secs() >= record.expires_at {
			self.db.remove(key)?;
			return Ok(None);
		}
		Ok(Some(record.value))
	}

	fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
		let record = StoredRecord {
			expires_at: now_epoch_secs() + ttl.as_secs() as i64,
			value: value.to_vec(),
		};
		self.db.insert(key, bincode::serialize(&record)?)?;
		Ok(())
	}

	fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
		let mut removed = 0;
		for entry in self.db.scan_prefix(prefix) {
			let (key, _) = entry?;
			self.db.remove(&key)?;
			removed += 1;
		}
		Ok(removed)
	}
}

/// In-memory store for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredRecord>> {
		self.entries.lock().unwrap_or_else(|e| e.into_inner())
	}
}

impl CacheStore for MemoryStore {
	fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
		let mut entries = self.lock();
		let Some(record) = entries.get(key) else {
			return Ok(None);
		};
		if now_epoch_secs() >= record.expires_at {
			entries.remove(key);
			return Ok(None);
		}
		Ok(Some(record.value.clone()))
	}

	fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
		self.lock().insert(
			key.to_string(),
			StoredRecord {
				expires_at: now_epoch_secs() + ttl.as_secs() as i64,
				value: value.to_vec(),
			},
		);
		Ok(())
	}

	fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
		let mut entries = self.lock();
		let before = entries.len();
		entries.retain(|key, _| !key.starts_with(prefix));
		Ok(before - entries.len())
	}
}

/// Cache facade for computed previews.
///
/// ## Failure Policy
///
/// The cache must never break a preview. Every store or decode failure in
/// `get` logs a warning and reads as a miss; every failure in `save` logs
/// and is dropped. A payload that does not decode into a full
/// [`PreviewResult`] (both `embedding` and `meta` present) is a miss too.
/// Callers therefore treat this layer as advisory: slow path always
/// works, fast path when it can.
///
/// ## Disabled Mode
///
/// When `cache_enabled` is off or the backing store fails to open, the
/// facade is constructed without a store and every operation is a cheap
/// no-op.
pub struct PreviewCache {
	store: Option<Box<dyn CacheStore>>,
	ttl: Duration,
}

impl PreviewCache {
	/// Facade over an explicit store.
	pub fn new(store: Box<dyn CacheStore>, ttl: Duration) -> Self {
		Self {
			store: Some(store),
			ttl,
		}
	}

	/// A cache that ignores everything.
	pub fn disabled() -> Self {
		Self {
			store: None,
			ttl: Duration::ZERO,
		}
	}

	/// Open the sled-backed cache under `dir` per the config.
	///
	/// A store that cannot be opened downgrades to disabled with a
	/// warning rather than failing the pipeline.
	pub fn open(config: &DimredConfig, dir: &Path) -> Self {
		if !config.cache_enabled {
			info!("Cache: disabled by configuration");
			return Self::disabled();
		}
		match SledStore::open(dir) {
			Ok(store) => Self::new(Box::new(store), config.cache_ttl()),
			Err(err) => {
				warn!("Cache: unavailable, continuing without ({err})");
				Self::disabled()
			}
		}
	}

	pub fn enabled(&self) -> bool {
		self.store.is_some()
	}

	/// Cached preview for the key triple, or `None` on miss or any error.
	pub fn get(&self, resource_id: &str, view_id: &str, signature: &str) -> Option<PreviewResult> {
		let store = self.store.as_ref()?;
		let key = preview_key(resource_id, view_id, signature);
		let payload = match store.get(&key) {
			Ok(Some(payload)) => payload,
			Ok(None) => return None,
			Err(err) => {
				warn!("Cache: read failed for {key} ({err})");
				return None;
			}
		};
		match serde_json::from_slice::<PreviewResult>(&payload) {
			Ok(result) => {
				debug!("Cache: hit for {key}");
				Some(result)
			}
			Err(err) => {
				warn!("Cache: discarding malformed entry {key} ({err})");
				None
			}
		}
	}

	/// Store a preview under the key triple; errors are logged and dropped.
	pub fn save(&self, resource_id: &str, view_id: &str, signature: &str, result: &PreviewResult) {
		let Some(store) = self.store.as_ref() else {
			return;
		};
		let key = preview_key(resource_id, view_id, signature);
		let payload = match serde_json::to_vec(result) {
			Ok(payload) => payload,
			Err(err) => {
				warn!("Cache: could not serialize {key} ({err})");
				return;
			}
		};
		if let Err(err) = store.set(&key, &payload, self.ttl) {
			warn!("Cache: write failed for {key} ({err})");
		}
	}

	/// Drop every cached preview belonging to a resource.
	pub fn delete_for_resource(&self, resource_id: &str) {
		let Some(store) = self.store.as_ref() else {
			return;
		};
		let prefix = resource_prefix(resource_id);
		match store.delete_prefix(&prefix) {
			Ok(removed) if removed > 0 => {
				info!("Cache: purged {removed} entries for resource {resource_id}")
			}
			Ok(_) => {}
			Err(err) => warn!("Cache: purge failed for {prefix} ({err})"),
		}
	}
}
