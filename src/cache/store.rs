//! Cache store coordinating freshness, LRU eviction, and adapter delegation.

// std
use std::{
	collections::{BTreeMap, HashMap, HashSet},
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
};
// crates.io
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	cache::{
		adapter::CacheAdapter,
		entry::{CacheEntry, CacheResult, Freshness},
	},
	metrics::{CacheMetrics, CacheMetricsSnapshot},
};

/// Default time-to-live for entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default maximum number of entries held in memory.
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
	/// Name used in logs and metric labels.
	#[serde(default = "default_name")]
	pub name: String,
	/// Lifetime of an entry unless overridden per write.
	#[serde(default = "default_ttl")]
	pub ttl: Duration,
	/// Age after which an entry is served as stale; defaults to `ttl`.
	#[serde(default)]
	pub stale_time: Option<Duration>,
	/// Upper bound on live entries held in memory.
	#[serde(default = "default_max_entries")]
	pub max_entries: usize,
}
impl CacheConfig {
	/// Validate invariants for cache configuration.
	pub fn validate(&self) -> Result<()> {
		if self.ttl.is_zero() {
			return Err(Error::invalid_config("cache.ttl", "Must be greater than zero."));
		}
		if self.max_entries == 0 {
			return Err(Error::invalid_config("cache.max_entries", "Must be greater than zero."));
		}
		if let Some(stale_time) = self.stale_time
			&& stale_time > self.ttl
		{
			return Err(Error::invalid_config(
				"cache.stale_time",
				"Must be less than or equal to ttl.",
			));
		}

		Ok(())
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			name: default_name(),
			ttl: DEFAULT_TTL,
			stale_time: None,
			max_entries: DEFAULT_MAX_ENTRIES,
		}
	}
}

/// Per-write overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
	/// Lifetime override.
	pub ttl: Option<Duration>,
	/// Stale-time override.
	pub stale_time: Option<Duration>,
}
impl SetOptions {
	/// Override the lifetime of this write.
	pub fn ttl(mut self, ttl: Duration) -> Self {
		self.ttl = Some(ttl);

		self
	}

	/// Override the stale time of this write.
	pub fn stale_time(mut self, stale_time: Duration) -> Self {
		self.stale_time = Some(stale_time);

		self
	}
}

/// Point-in-time classification of live entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
	/// Live (non-expired) entries.
	pub size: usize,
	/// Live entries past their stale deadline.
	pub stale_count: usize,
	/// Live entries still fresh.
	pub fresh_count: usize,
	/// Configured size bound.
	pub max_entries: usize,
}

/// Builder for [`Cache`].
pub struct CacheBuilder<T> {
	config: CacheConfig,
	adapter: Option<Arc<dyn CacheAdapter<T>>>,
}
impl<T> CacheBuilder<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Create a builder with default configuration.
	pub fn new() -> Self {
		Self { config: CacheConfig::default(), adapter: None }
	}

	/// Replace the whole configuration.
	pub fn config(mut self, config: CacheConfig) -> Self {
		self.config = config;

		self
	}

	/// Name used in logs and metric labels.
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.config.name = name.into();

		self
	}

	/// Default entry lifetime.
	pub fn ttl(mut self, ttl: Duration) -> Self {
		self.config.ttl = ttl;

		self
	}

	/// Default stale time.
	pub fn stale_time(mut self, stale_time: Duration) -> Self {
		self.config.stale_time = Some(stale_time);

		self
	}

	/// Upper bound on in-memory entries.
	pub fn max_entries(mut self, max_entries: usize) -> Self {
		self.config.max_entries = max_entries;

		self
	}

	/// Delegate storage to an external adapter.
	pub fn adapter<A>(mut self, adapter: A) -> Self
	where
		A: CacheAdapter<T> + 'static,
	{
		self.adapter = Some(Arc::new(adapter));

		self
	}

	/// Delegate storage to a shared adapter.
	pub fn shared_adapter(mut self, adapter: Arc<dyn CacheAdapter<T>>) -> Self {
		self.adapter = Some(adapter);

		self
	}

	/// Validate the configuration and construct a [`Cache`].
	pub fn build(self) -> Result<Cache<T>> {
		self.config.validate()?;

		Ok(Cache {
			inner: Arc::new(CacheInner {
				config: self.config,
				store: Mutex::new(LruStore::default()),
				adapter: self.adapter,
				refreshing: Mutex::new(HashSet::new()),
				metrics: CacheMetrics::default(),
			}),
		})
	}
}
impl<T> Default for CacheBuilder<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<T> Debug for CacheBuilder<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("CacheBuilder")
			.field("config", &self.config)
			.field("adapter", &self.adapter)
			.finish()
	}
}

/// Keyed response cache distinguishing fresh, stale, and expired entries.
///
/// Handles are cheap to clone and share one store. Store mutations happen inside synchronous
/// lock sections only; nothing is held across an adapter round-trip, and entries returned by an
/// adapter are re-checked for expiry after the await.
pub struct Cache<T> {
	inner: Arc<CacheInner<T>>,
}
impl<T> Cache<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Build an in-memory cache from `config`.
	pub fn new(config: CacheConfig) -> Result<Self> {
		CacheBuilder::new().config(config).build()
	}

	/// Create a [`CacheBuilder`] for advanced configuration.
	pub fn builder() -> CacheBuilder<T> {
		CacheBuilder::new()
	}

	/// Active configuration.
	pub fn config(&self) -> &CacheConfig {
		&self.inner.config
	}

	/// Snapshot of hit, miss, and eviction counters.
	pub fn metrics(&self) -> CacheMetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	/// Store `data` under `key`.
	///
	/// The stale deadline resolves from the write's stale time, then the configured stale time,
	/// then the effective ttl. Inserting a new key into a full store evicts the least recently
	/// accessed entry first.
	pub async fn set(&self, key: impl Into<String>, data: T, options: SetOptions) -> Result<()> {
		let key = key.into();
		let config = &self.inner.config;
		let ttl = options.ttl.unwrap_or(config.ttl);
		let stale_time = options.stale_time.or(config.stale_time).unwrap_or(ttl);
		let entry = CacheEntry::new(data, Instant::now(), ttl, stale_time);

		self.inner.metrics.record_write();

		if let Some(adapter) = &self.inner.adapter {
			return adapter.set(&key, entry).await;
		}

		let evicted = { self.inner.store.lock().insert(key, entry, config.max_entries) };

		if let Some(evicted) = evicted {
			tracing::debug!(cache = %config.name, key = %evicted, "evicted least recently used entry");

			self.inner.metrics.record_eviction(&config.name);
		}

		Ok(())
	}

	/// Look up `key`, removing it if it has expired.
	pub async fn get(&self, key: &str) -> Result<Option<CacheResult<T>>> {
		let result = match &self.inner.adapter {
			Some(adapter) => match adapter.get(key).await? {
				Some(entry) => match entry.project(Instant::now()) {
					Some(result) => Some(result),
					None => {
						adapter.delete(key).await?;

						None
					},
				},
				None => None,
			},
			None => self.inner.store.lock().get(key, Instant::now()),
		};

		match &result {
			Some(result) => self.inner.metrics.record_hit(&self.inner.config.name, result.is_stale),
			None => self.inner.metrics.record_miss(&self.inner.config.name),
		}

		Ok(result)
	}

	/// Whether a live entry exists for `key`, removing it if it has expired.
	pub async fn has(&self, key: &str) -> Result<bool> {
		match &self.inner.adapter {
			Some(adapter) => match adapter.get(key).await? {
				Some(entry) if entry.is_expired(Instant::now()) => {
					adapter.delete(key).await?;

					Ok(false)
				},
				Some(_) => Ok(true),
				None => Ok(false),
			},
			None => Ok(self.inner.store.lock().has(key, Instant::now())),
		}
	}

	/// Remove `key`, reporting whether an entry existed.
	pub async fn delete(&self, key: &str) -> Result<bool> {
		match &self.inner.adapter {
			Some(adapter) => adapter.delete(key).await,
			None => Ok(self.inner.store.lock().remove(key)),
		}
	}

	/// Remove every key matching `pattern`, returning the number removed.
	pub async fn invalidate_by_pattern(&self, pattern: &Regex) -> Result<usize> {
		let removed = match &self.inner.adapter {
			Some(adapter) => {
				let keys = adapter.keys("*").await?;

				self.delete_from_adapter(adapter.as_ref(), keys.iter().filter(|key| pattern.is_match(key)))
					.await?
			},
			None => self.inner.store.lock().retain(|key| !pattern.is_match(key)),
		};

		tracing::debug!(cache = %self.inner.config.name, %pattern, removed, "invalidated by pattern");

		Ok(removed)
	}

	/// Remove every key starting with `prefix`, returning the number removed.
	pub async fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize> {
		let removed = match &self.inner.adapter {
			Some(adapter) => {
				let keys = adapter.keys(&format!("{}*", literal_glob_prefix(prefix))).await?;

				self.delete_from_adapter(adapter.as_ref(), keys.iter().filter(|key| key.starts_with(prefix)))
					.await?
			},
			None => self.inner.store.lock().retain(|key| !key.starts_with(prefix)),
		};

		tracing::debug!(cache = %self.inner.config.name, prefix, removed, "invalidated by prefix");

		Ok(removed)
	}

	/// Remove every entry.
	pub async fn clear(&self) -> Result<()> {
		match &self.inner.adapter {
			Some(adapter) => adapter.clear().await,
			None => {
				self.inner.store.lock().clear();

				Ok(())
			},
		}
	}

	/// Classify every live entry as fresh or stale in one pass.
	pub async fn stats(&self) -> Result<CacheStats> {
		let mut stats = CacheStats {
			size: 0,
			stale_count: 0,
			fresh_count: 0,
			max_entries: self.inner.config.max_entries,
		};
		let mut classify = |freshness: Freshness| match freshness {
			Freshness::Fresh => stats.fresh_count += 1,
			Freshness::Stale => stats.stale_count += 1,
			Freshness::Expired => {},
		};

		match &self.inner.adapter {
			Some(adapter) =>
				for key in adapter.keys("*").await? {
					if let Some(entry) = adapter.get(&key).await? {
						classify(entry.freshness(Instant::now()));
					}
				},
			None => {
				let now = Instant::now();
				let store = self.inner.store.lock();

				for slot in store.entries.values() {
					classify(slot.entry.freshness(now));
				}
			},
		}

		stats.size = stats.fresh_count + stats.stale_count;

		Ok(stats)
	}

	/// Read through the cache with stale-while-revalidate semantics.
	///
	/// A fresh hit is returned as is. A stale hit is returned immediately while `fetcher` refreshes
	/// the entry in a background task; at most one refresh per key runs at a time. A miss awaits
	/// `fetcher`, stores its value, and returns it.
	pub async fn get_or_fetch<F, Fut>(&self, key: &str, options: SetOptions, fetcher: F) -> Result<T>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		match self.get(key).await? {
			Some(result) if !result.is_stale => Ok(result.data),
			Some(result) => {
				self.revalidate(key, options, fetcher);

				Ok(result.data)
			},
			None => {
				let data = fetcher().await?;

				self.set(key, data.clone(), options).await?;

				Ok(data)
			},
		}
	}

	/// Refresh `key` with `fetcher` in a background task.
	///
	/// Returns `false` without spawning when a refresh for `key` is already running.
	pub fn revalidate<F, Fut>(&self, key: &str, options: SetOptions, fetcher: F) -> bool
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		if !self.inner.refreshing.lock().insert(key.to_owned()) {
			return false;
		}

		let cache = self.clone();
		let key = key.to_owned();

		tokio::spawn(async move {
			let outcome = match fetcher().await {
				Ok(data) => cache.set(key.clone(), data, options).await,
				Err(err) => Err(err),
			};

			if let Err(err) = outcome {
				tracing::warn!(cache = %cache.inner.config.name, %key, error = %err, "background refresh failed");
			}

			cache.inner.refreshing.lock().remove(&key);
		});

		true
	}

	async fn delete_from_adapter<'a, I>(
		&self,
		adapter: &dyn CacheAdapter<T>,
		keys: I,
	) -> Result<usize>
	where
		I: Iterator<Item = &'a String>,
	{
		let mut removed = 0;

		for key in keys {
			if adapter.delete(key).await? {
				removed += 1;
			}
		}

		Ok(removed)
	}
}
impl<T> Clone for Cache<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<T> Debug for Cache<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Cache")
			.field("config", &self.inner.config)
			.field("adapter", &self.inner.adapter)
			.field("size", &self.inner.store.lock().entries.len())
			.finish()
	}
}

struct CacheInner<T> {
	config: CacheConfig,
	store: Mutex<LruStore<T>>,
	adapter: Option<Arc<dyn CacheAdapter<T>>>,
	refreshing: Mutex<HashSet<String>>,
	metrics: CacheMetrics,
}

/// In-memory map plus an access-order ledger.
///
/// Every `get`/`set` stamps the key with a monotonically increasing tick; `order` maps ticks back
/// to keys so the least recently accessed key is the first entry of the ledger.
struct LruStore<T> {
	entries: HashMap<String, Slot<T>>,
	order: BTreeMap<u64, String>,
	tick: u64,
}
impl<T> LruStore<T>
where
	T: Clone,
{
	fn insert(&mut self, key: String, entry: CacheEntry<T>, max_entries: usize) -> Option<String> {
		let mut evicted = None;

		if !self.entries.contains_key(&key) && self.entries.len() >= max_entries {
			evicted = self.pop_least_recent();
		}

		let tick = self.next_tick();

		if let Some(previous) = self.entries.insert(key.clone(), Slot { entry, tick }) {
			self.order.remove(&previous.tick);
		}

		self.order.insert(tick, key);

		evicted
	}

	fn get(&mut self, key: &str, now: Instant) -> Option<CacheResult<T>> {
		let result = self.entries.get(key)?.entry.project(now);

		match result {
			Some(result) => {
				self.touch(key);

				Some(result)
			},
			None => {
				self.remove(key);

				None
			},
		}
	}

	fn has(&mut self, key: &str, now: Instant) -> bool {
		match self.entries.get(key) {
			Some(slot) if slot.entry.is_expired(now) => {
				self.remove(key);

				false
			},
			Some(_) => true,
			None => false,
		}
	}

	fn remove(&mut self, key: &str) -> bool {
		match self.entries.remove(key) {
			Some(slot) => {
				self.order.remove(&slot.tick);

				true
			},
			None => false,
		}
	}

	fn retain<F>(&mut self, mut keep: F) -> usize
	where
		F: FnMut(&str) -> bool,
	{
		let doomed = self.entries.keys().filter(|key| !keep(key)).cloned().collect::<Vec<_>>();

		for key in &doomed {
			self.remove(key);
		}

		doomed.len()
	}

	fn clear(&mut self) {
		self.entries.clear();
		self.order.clear();
	}

	fn touch(&mut self, key: &str) {
		let tick = self.next_tick();

		if let Some(slot) = self.entries.get_mut(key) {
			self.order.remove(&slot.tick);
			slot.tick = tick;
			self.order.insert(tick, key.to_owned());
		}
	}

	fn pop_least_recent(&mut self) -> Option<String> {
		let (_, key) = self.order.pop_first()?;

		self.entries.remove(&key);

		Some(key)
	}

	fn next_tick(&mut self) -> u64 {
		self.tick = self.tick.wrapping_add(1);

		self.tick
	}
}
impl<T> Default for LruStore<T> {
	fn default() -> Self {
		Self { entries: HashMap::new(), order: BTreeMap::new(), tick: 0 }
	}
}

struct Slot<T> {
	entry: CacheEntry<T>,
	tick: u64,
}

// Longest leading part of `prefix` free of glob syntax; callers re-filter with `starts_with`.
fn literal_glob_prefix(prefix: &str) -> &str {
	match prefix.find(['*', '?', '[', ']', '\\']) {
		Some(at) => &prefix[..at],
		None => prefix,
	}
}

fn default_name() -> String {
	"default".into()
}

fn default_ttl() -> Duration {
	DEFAULT_TTL
}

fn default_max_entries() -> usize {
	DEFAULT_MAX_ENTRIES
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use async_trait::async_trait;
	use serde_json::{Value, json};
	use tokio::time;
	// self
	use super::*;
	use crate::cache::adapter::MemoryAdapter;

	fn cache(ttl_ms: u64, stale_ms: u64, max_entries: usize) -> Cache<Value> {
		Cache::builder()
			.name("test")
			.ttl(Duration::from_millis(ttl_ms))
			.stale_time(Duration::from_millis(stale_ms))
			.max_entries(max_entries)
			.build()
			.expect("cache")
	}

	#[tokio::test(start_paused = true)]
	async fn entries_move_from_fresh_to_stale_to_gone() -> Result<()> {
		let cache = cache(1_000, 200, 10);

		cache.set("k", json!({ "v": 1 }), SetOptions::default()).await?;

		let fresh = cache.get("k").await?.expect("fresh entry");

		assert_eq!(fresh.data, json!({ "v": 1 }));
		assert!(!fresh.is_stale);

		time::advance(Duration::from_millis(300)).await;

		let stale = cache.get("k").await?.expect("stale entry");

		assert_eq!(stale.data, json!({ "v": 1 }));
		assert!(stale.is_stale);

		time::advance(Duration::from_millis(800)).await;

		assert!(cache.get("k").await?.is_none());
		assert_eq!(cache.stats().await?.size, 0);

		Ok(())
	}

	#[tokio::test(start_paused = true)]
	async fn per_write_options_override_configuration() -> Result<()> {
		let cache = cache(1_000, 1_000, 10);

		cache
			.set(
				"short",
				json!(1),
				SetOptions::default().ttl(Duration::from_millis(100)).stale_time(Duration::from_millis(50)),
			)
			.await?;

		time::advance(Duration::from_millis(60)).await;

		assert!(cache.get("short").await?.expect("live").is_stale);

		time::advance(Duration::from_millis(50)).await;

		assert!(!cache.has("short").await?);

		Ok(())
	}

	#[tokio::test]
	async fn evicts_least_recently_accessed_key() -> Result<()> {
		let cache = cache(60_000, 30_000, 3);

		cache.set("a", json!("a"), SetOptions::default()).await?;
		cache.set("b", json!("b"), SetOptions::default()).await?;
		cache.set("c", json!("c"), SetOptions::default()).await?;

		assert!(cache.get("a").await?.is_some());

		cache.set("d", json!("d"), SetOptions::default()).await?;

		assert!(cache.has("a").await?);
		assert!(!cache.has("b").await?);
		assert!(cache.has("c").await?);
		assert!(cache.has("d").await?);
		assert_eq!(cache.metrics().evictions, 1);
		assert_eq!(cache.stats().await?.size, 3);

		Ok(())
	}

	#[tokio::test]
	async fn replacing_a_key_does_not_evict() -> Result<()> {
		let cache = cache(60_000, 30_000, 2);

		cache.set("a", json!(1), SetOptions::default()).await?;
		cache.set("b", json!(2), SetOptions::default()).await?;
		cache.set("a", json!(3), SetOptions::default()).await?;

		assert_eq!(cache.metrics().evictions, 0);
		assert_eq!(cache.get("a").await?.expect("a").data, json!(3));
		assert!(cache.has("b").await?);

		Ok(())
	}

	#[tokio::test]
	async fn pattern_and_prefix_invalidation_count_removed_keys() -> Result<()> {
		let cache = cache(60_000, 30_000, 10);

		cache.set("user:1", json!(1), SetOptions::default()).await?;
		cache.set("user:2", json!(2), SetOptions::default()).await?;
		cache.set("order:1", json!(3), SetOptions::default()).await?;

		let pattern = Regex::new("^user:").expect("regex");

		assert_eq!(cache.invalidate_by_pattern(&pattern).await?, 2);
		assert!(cache.get("user:1").await?.is_none());
		assert!(cache.get("order:1").await?.is_some());
		assert_eq!(cache.invalidate_by_prefix("order:").await?, 1);
		assert_eq!(cache.stats().await?.size, 0);

		Ok(())
	}

	#[test]
	fn prefix_globs_stop_before_metacharacters() {
		assert_eq!(literal_glob_prefix("GET:/products"), "GET:/products");
		assert_eq!(literal_glob_prefix("GET:/search?q=lamp"), "GET:/search");
		assert_eq!(literal_glob_prefix("GET:/tags/[new]"), "GET:/tags/");
		assert_eq!(literal_glob_prefix("GET:/a\\b*"), "GET:/a");
	}

	#[tokio::test]
	async fn adapter_prefix_invalidation_treats_globs_literally() -> Result<()> {
		let cache = Cache::<Value>::builder().adapter(MemoryAdapter::new()).build()?;

		cache.set("GET:/tags/[new]:1", json!(1), SetOptions::default()).await?;
		cache.set("GET:/tags/[new]:2", json!(2), SetOptions::default()).await?;
		cache.set("GET:/tags/n:1", json!(3), SetOptions::default()).await?;
		cache.set("GET:/search?q=*", json!(4), SetOptions::default()).await?;
		cache.set("GET:/searchXq=1", json!(5), SetOptions::default()).await?;

		assert_eq!(cache.invalidate_by_prefix("GET:/tags/[new]").await?, 2);
		assert!(cache.has("GET:/tags/n:1").await?);
		assert_eq!(cache.invalidate_by_prefix("GET:/search?q=").await?, 1);
		assert!(cache.has("GET:/searchXq=1").await?);

		Ok(())
	}

	#[tokio::test(start_paused = true)]
	async fn stats_classify_live_entries() -> Result<()> {
		let cache = cache(1_000, 200, 10);

		cache.set("old", json!(1), SetOptions::default()).await?;

		time::advance(Duration::from_millis(300)).await;

		cache.set("new", json!(2), SetOptions::default()).await?;

		let stats = cache.stats().await?;

		assert_eq!(
			stats,
			CacheStats { size: 2, stale_count: 1, fresh_count: 1, max_entries: 10 }
		);

		cache.clear().await?;

		assert_eq!(cache.stats().await?.size, 0);
		assert!(!cache.delete("old").await?);

		Ok(())
	}

	#[tokio::test(start_paused = true)]
	async fn adapter_backed_cache_revalidates_expiry() -> Result<()> {
		let adapter = Arc::new(MemoryAdapter::<Value>::new());
		let cache = Cache::builder()
			.ttl(Duration::from_millis(500))
			.stale_time(Duration::from_millis(100))
			.shared_adapter(adapter.clone())
			.build()?;

		cache.set("user:1", json!(1), SetOptions::default()).await?;
		cache.set("user:2", json!(2), SetOptions::default()).await?;
		cache.set("order:1", json!(3), SetOptions::default()).await?;

		assert_eq!(adapter.len(), 3);
		assert!(!cache.get("user:1").await?.expect("fresh").is_stale);
		assert_eq!(cache.invalidate_by_pattern(&Regex::new("^user:").expect("regex")).await?, 2);

		time::advance(Duration::from_millis(200)).await;

		assert_eq!(cache.stats().await?.stale_count, 1);

		time::advance(Duration::from_millis(400)).await;

		assert!(cache.get("order:1").await?.is_none());
		assert!(adapter.is_empty());

		Ok(())
	}

	#[derive(Debug)]
	struct FailingAdapter;
	#[async_trait]
	impl CacheAdapter<Value> for FailingAdapter {
		async fn get(&self, _: &str) -> Result<Option<CacheEntry<Value>>> {
			Err(Error::custom("connection refused", 503, "CACHE_UNAVAILABLE"))
		}

		async fn set(&self, _: &str, _: CacheEntry<Value>) -> Result<()> {
			Err(Error::custom("connection refused", 503, "CACHE_UNAVAILABLE"))
		}

		async fn delete(&self, _: &str) -> Result<bool> {
			Ok(false)
		}

		async fn has(&self, _: &str) -> Result<bool> {
			Ok(false)
		}

		async fn clear(&self) -> Result<()> {
			Ok(())
		}

		async fn keys(&self, _: &str) -> Result<Vec<String>> {
			Ok(Vec::new())
		}
	}

	#[tokio::test]
	async fn adapter_failures_propagate_unchanged() {
		let cache = Cache::builder().adapter(FailingAdapter).build().expect("cache");
		let set = cache.set("k", json!(1), SetOptions::default()).await.expect_err("set fails");
		let get = cache.get("k").await.expect_err("get fails");

		assert_eq!(set.code(), "CACHE_UNAVAILABLE");
		assert_eq!(get.status_code(), 503);
	}

	#[tokio::test(start_paused = true)]
	async fn get_or_fetch_serves_stale_while_refreshing() -> Result<()> {
		let cache = cache(1_000, 200, 10);
		let calls = Arc::new(AtomicUsize::new(0));
		let fetch = |calls: Arc<AtomicUsize>| {
			move || async move { Ok::<_, Error>(json!(calls.fetch_add(1, Ordering::SeqCst) + 1)) }
		};

		assert_eq!(cache.get_or_fetch("k", SetOptions::default(), fetch(calls.clone())).await?, json!(1));
		assert_eq!(cache.get_or_fetch("k", SetOptions::default(), fetch(calls.clone())).await?, json!(1));
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		time::advance(Duration::from_millis(300)).await;

		assert_eq!(cache.get_or_fetch("k", SetOptions::default(), fetch(calls.clone())).await?, json!(1));

		for _ in 0..10 {
			tokio::task::yield_now().await;
		}

		assert_eq!(calls.load(Ordering::SeqCst), 2);

		let refreshed = cache.get("k").await?.expect("refreshed");

		assert_eq!(refreshed.data, json!(2));
		assert!(!refreshed.is_stale);

		Ok(())
	}

	#[test]
	fn rejects_invalid_configuration() {
		let config = CacheConfig {
			stale_time: Some(Duration::from_secs(600)),
			..Default::default()
		};

		assert_eq!(config.validate().expect_err("invalid").code(), "INVALID_CONFIG");
		assert!(CacheConfig { max_entries: 0, ..Default::default() }.validate().is_err());
		assert!(CacheConfig::default().validate().is_ok());
	}
}
