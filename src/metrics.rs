//! Metrics helpers and per-cache telemetry bookkeeping.
//!
//! [`CacheMetrics`] counters are always maintained. Global `metrics` counters and the Prometheus
//! exporter are only emitted when the `metrics` / `prometheus` features are enabled.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "metrics")] use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")] use smallvec::SmallVec;
// self
#[cfg(feature = "prometheus")] use crate::_prelude::*;

#[cfg(feature = "metrics")]
type LabelSet = SmallVec<[Label; 2]>;

#[cfg(feature = "metrics")]
const METRIC_REQUESTS_TOTAL: &str = "api_cache_requests_total";
#[cfg(feature = "metrics")]
const METRIC_HITS_TOTAL: &str = "api_cache_hits_total";
#[cfg(feature = "metrics")]
const METRIC_STALE_TOTAL: &str = "api_cache_stale_total";
#[cfg(feature = "metrics")]
const METRIC_MISSES_TOTAL: &str = "api_cache_misses_total";
#[cfg(feature = "metrics")]
const METRIC_EVICTIONS_TOTAL: &str = "api_cache_evictions_total";
#[cfg(feature = "metrics")]
const METRIC_RETRY_ATTEMPTS_TOTAL: &str = "api_retry_attempts_total";
#[cfg(feature = "metrics")]
const METRIC_RETRY_OUTCOMES_TOTAL: &str = "api_retry_outcomes_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe counters for a single cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	stale_hits: AtomicU64,
	misses: AtomicU64,
	evictions: AtomicU64,
	writes: AtomicU64,
}
impl CacheMetrics {
	/// Record a lookup that found a live entry.
	pub fn record_hit(&self, cache: &str, stale: bool) {
		self.hits.fetch_add(1, Ordering::Relaxed);

		if stale {
			self.stale_hits.fetch_add(1, Ordering::Relaxed);
		}

		record_lookup_hit(cache, stale);
	}

	/// Record a lookup that found nothing usable.
	pub fn record_miss(&self, cache: &str) {
		self.misses.fetch_add(1, Ordering::Relaxed);

		record_lookup_miss(cache);
	}

	/// Record an LRU eviction.
	pub fn record_eviction(&self, cache: &str) {
		self.evictions.fetch_add(1, Ordering::Relaxed);

		record_cache_eviction(cache);
	}

	/// Record a write.
	pub fn record_write(&self) {
		self.writes.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			hits: self.hits.load(Ordering::Relaxed),
			stale_hits: self.stale_hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			writes: self.writes.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of [`CacheMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
	/// Lookups served from the cache, stale or not.
	pub hits: u64,
	/// Lookups served from stale entries.
	pub stale_hits: u64,
	/// Lookups that found nothing usable.
	pub misses: u64,
	/// Entries evicted to respect the size bound.
	pub evictions: u64,
	/// Entries written.
	pub writes: u64,
}
impl CacheMetricsSnapshot {
	/// Ratio of hits to lookups.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;

		if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
	}

	/// Ratio of stale hits to lookups.
	pub fn stale_ratio(&self) -> f64 {
		let total = self.hits + self.misses;

		if total == 0 { 0.0 } else { self.stale_hits as f64 / total as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder().map_err(|err| {
		Error::custom(format!("Failed to install Prometheus recorder: {err}."), 500, "METRICS_ERROR")
	})?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a retry scheduled after a failed attempt.
pub fn record_retry_attempt(kind: &'static str) {
	#[cfg(feature = "metrics")]
	{
		let mut labels = LabelSet::new();

		labels.push(Label::new("error", kind));

		metrics::counter!(METRIC_RETRY_ATTEMPTS_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = kind;
}

/// Record the terminal outcome of a retry loop.
pub fn record_retry_outcome(success: bool) {
	#[cfg(feature = "metrics")]
	{
		let mut labels = LabelSet::new();

		labels.push(Label::new("outcome", if success { "success" } else { "exhausted" }));

		metrics::counter!(METRIC_RETRY_OUTCOMES_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = success;
}

fn record_lookup_hit(cache: &str, stale: bool) {
	#[cfg(feature = "metrics")]
	{
		let labels = cache_labels(cache);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

		if stale {
			metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
		}
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (cache, stale);
}

fn record_lookup_miss(cache: &str) {
	#[cfg(feature = "metrics")]
	{
		let labels = cache_labels(cache);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = cache;
}

fn record_cache_eviction(cache: &str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(METRIC_EVICTIONS_TOTAL, cache_labels(cache).iter()).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = cache;
}

#[cfg(feature = "metrics")]
fn cache_labels(cache: &str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("cache", cache.to_owned()));

	labels
}
