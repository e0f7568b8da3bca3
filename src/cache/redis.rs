//! Redis-backed [`CacheAdapter`].
//!
//! Entries are persisted as JSON with wall-clock deadlines, since monotonic instants do not
//! survive a process boundary. Deadlines are converted back to instants relative to the reading
//! process's clock.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	marker::PhantomData,
};
// crates.io
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
// self
use crate::{
	_prelude::*,
	cache::{adapter::CacheAdapter, entry::CacheEntry},
};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "api-cache";

/// Adapter storing entries in Redis under `{namespace}:{key}`.
pub struct RedisAdapter<T> {
	client: redis::Client,
	namespace: Arc<str>,
	_data: PhantomData<fn() -> T>,
}
impl<T> RedisAdapter<T> {
	/// Create an adapter using the default namespace.
	pub fn new(client: redis::Client) -> Self {
		Self { client, namespace: Arc::from(DEFAULT_NAMESPACE), _data: PhantomData }
	}

	/// Adjust the key namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Arc::from(namespace.into());

		self
	}

	fn key(&self, key: &str) -> String {
		format!("{}:{key}", self.namespace)
	}

	fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
		key.strip_prefix(self.namespace.as_ref())?.strip_prefix(':')
	}
}
impl<T> Clone for RedisAdapter<T> {
	fn clone(&self) -> Self {
		Self { client: self.client.clone(), namespace: self.namespace.clone(), _data: PhantomData }
	}
}
impl<T> Debug for RedisAdapter<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RedisAdapter").field("namespace", &self.namespace).finish_non_exhaustive()
	}
}
#[async_trait]
impl<T> CacheAdapter<T> for RedisAdapter<T>
where
	T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
	async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let value: Option<String> = conn.get(self.key(key)).await?;

		match value {
			Some(json) => {
				let stored: StoredEntry<T> = serde_json::from_str(&json)?;

				Ok(stored.into_entry(Instant::now(), Utc::now()))
			},
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<()> {
		let now = Instant::now();
		let ttl_secs = entry.time_to_expire(now).as_secs_f64().ceil().max(1.) as u64;
		let stored = StoredEntry::from_entry(entry, now, Utc::now());
		let payload = serde_json::to_string(&stored)?;
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		conn.set_ex::<_, _, ()>(self.key(key), payload, ttl_secs).await?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<bool> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let removed: u64 = conn.del(self.key(key)).await?;

		Ok(removed > 0)
	}

	async fn has(&self, key: &str) -> Result<bool> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		Ok(conn.exists::<_, bool>(self.key(key)).await?)
	}

	async fn clear(&self) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let keys: Vec<String> = conn.keys(self.key("*")).await?;

		if !keys.is_empty() {
			conn.del::<_, ()>(keys).await?;
		}

		Ok(())
	}

	async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let keys: Vec<String> = conn.keys(self.key(pattern)).await?;

		Ok(keys.iter().filter_map(|key| self.strip(key)).map(ToOwned::to_owned).collect())
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
	data: T,
	created_at: DateTime<Utc>,
	stale_at: DateTime<Utc>,
	expires_at: DateTime<Utc>,
}
impl<T> StoredEntry<T> {
	fn from_entry(entry: CacheEntry<T>, now: Instant, wallclock: DateTime<Utc>) -> Self {
		Self {
			created_at: to_datetime(entry.created_at, now, wallclock),
			stale_at: to_datetime(entry.stale_at, now, wallclock),
			expires_at: to_datetime(entry.expires_at, now, wallclock),
			data: entry.data,
		}
	}

	fn into_entry(self, now: Instant, wallclock: DateTime<Utc>) -> Option<CacheEntry<T>> {
		Some(CacheEntry {
			created_at: to_instant(self.created_at, now, wallclock)?,
			stale_at: to_instant(self.stale_at, now, wallclock)?,
			expires_at: to_instant(self.expires_at, now, wallclock)?,
			data: self.data,
		})
	}
}

fn to_datetime(instant: Instant, now: Instant, wallclock: DateTime<Utc>) -> DateTime<Utc> {
	let datetime = if let Some(delta) = instant.checked_duration_since(now) {
		TimeDelta::from_std(delta).ok().and_then(|delta| wallclock.checked_add_signed(delta))
	} else {
		TimeDelta::from_std(now.duration_since(instant))
			.ok()
			.and_then(|delta| wallclock.checked_sub_signed(delta))
	};

	datetime.unwrap_or(wallclock)
}

fn to_instant(datetime: DateTime<Utc>, now: Instant, wallclock: DateTime<Utc>) -> Option<Instant> {
	let delta = datetime - wallclock;

	match delta.to_std() {
		Ok(ahead) => now.checked_add(ahead),
		Err(_) => now.checked_sub((-delta).to_std().ok()?),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn deadlines_survive_wallclock_round_trip() {
		let now = Instant::now();
		let wallclock = Utc::now();
		let entry = CacheEntry::new(7_u32, now, Duration::from_secs(60), Duration::from_secs(10));
		let stored = StoredEntry::from_entry(entry.clone(), now, wallclock);

		assert_eq!(stored.expires_at - stored.created_at, TimeDelta::seconds(60));

		let restored = stored.into_entry(now, wallclock).expect("entry");

		assert_eq!(restored.expires_at, entry.expires_at);
		assert_eq!(restored.stale_at, entry.stale_at);
		assert_eq!(restored.data, 7);
	}
}
