//! Cache entry definitions and freshness helpers.

// self
use crate::_prelude::*;

/// Freshness classification of an entry at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// Safe to serve without refreshing.
	Fresh,
	/// Still servable, but a refresh should be triggered.
	Stale,
	/// Past its TTL; must not be served.
	Expired,
}

/// Cached value together with its freshness deadlines.
///
/// Entries are immutable once created; re-setting a key replaces the entry.
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
	/// Cached payload.
	pub data: T,
	/// Monotonic instant when the entry was written.
	pub created_at: Instant,
	/// Instant after which the entry is served as stale.
	pub stale_at: Instant,
	/// Instant after which the entry is no longer served.
	pub expires_at: Instant,
}
impl<T> CacheEntry<T> {
	/// Create an entry written at `now`.
	///
	/// `stale_time` is clamped to `ttl` so that `created_at <= stale_at <= expires_at` holds.
	pub fn new(data: T, now: Instant, ttl: Duration, stale_time: Duration) -> Self {
		Self {
			data,
			created_at: now,
			stale_at: now + stale_time.min(ttl),
			expires_at: now + ttl,
		}
	}

	/// Classify the entry at `now`.
	pub fn freshness(&self, now: Instant) -> Freshness {
		if now > self.expires_at {
			Freshness::Expired
		} else if now > self.stale_at {
			Freshness::Stale
		} else {
			Freshness::Fresh
		}
	}

	/// Whether the entry has outlived its TTL.
	pub fn is_expired(&self, now: Instant) -> bool {
		now > self.expires_at
	}

	/// Whether the entry is past its stale deadline.
	pub fn is_stale(&self, now: Instant) -> bool {
		now > self.stale_at
	}

	/// Remaining lifetime at `now`.
	pub fn time_to_expire(&self, now: Instant) -> Duration {
		self.expires_at.saturating_duration_since(now)
	}
}
impl<T> CacheEntry<T>
where
	T: Clone,
{
	/// Project the entry into a read result at `now`, or `None` once expired.
	pub fn project(&self, now: Instant) -> Option<CacheResult<T>> {
		if self.is_expired(now) {
			return None;
		}

		Some(CacheResult {
			data: self.data.clone(),
			is_stale: self.is_stale(now),
			created_at: self.created_at,
			time_to_expire: self.time_to_expire(now),
		})
	}
}

/// Read-time view of a cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheResult<T> {
	/// Cached payload.
	pub data: T,
	/// Whether the entry is past its stale deadline.
	pub is_stale: bool,
	/// Instant when the entry was written.
	pub created_at: Instant,
	/// Remaining lifetime.
	pub time_to_expire: Duration,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn stale_time_is_clamped_to_ttl() {
		let now = Instant::now();
		let entry = CacheEntry::new(1, now, Duration::from_secs(10), Duration::from_secs(60));

		assert_eq!(entry.stale_at, entry.expires_at);
		assert!(entry.created_at <= entry.stale_at);
	}

	#[test]
	fn freshness_moves_from_fresh_to_stale_to_expired() {
		let now = Instant::now();
		let entry = CacheEntry::new("v", now, Duration::from_millis(1_000), Duration::from_millis(200));

		assert_eq!(entry.freshness(now), Freshness::Fresh);
		assert_eq!(entry.freshness(now + Duration::from_millis(200)), Freshness::Fresh);
		assert_eq!(entry.freshness(now + Duration::from_millis(300)), Freshness::Stale);
		assert_eq!(entry.freshness(now + Duration::from_millis(1_100)), Freshness::Expired);
	}

	#[test]
	fn projection_reports_remaining_lifetime() {
		let now = Instant::now();
		let entry = CacheEntry::new("v", now, Duration::from_millis(1_000), Duration::from_millis(200));
		let result = entry.project(now + Duration::from_millis(400)).expect("live entry");

		assert!(result.is_stale);
		assert_eq!(result.time_to_expire, Duration::from_millis(600));
		assert!(entry.project(now + Duration::from_millis(1_001)).is_none());
	}
}
