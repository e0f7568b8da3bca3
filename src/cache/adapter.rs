//! External storage adapters for [`Cache`](crate::cache::Cache).
//!
//! An adapter replaces the in-process map so a distributed store can back the cache without
//! changing call sites. Adapters store entries verbatim; the cache re-validates expiry on every
//! read, so adapters are free to keep expired entries around until asked to delete them.

// std
use std::{collections::HashMap, fmt::Debug};
// crates.io
use async_trait::async_trait;
use parking_lot::Mutex;
use wildmatch::WildMatch;
// self
use crate::{_prelude::*, cache::entry::CacheEntry};

/// Asynchronous storage backend for cache entries.
///
/// `keys` takes a glob pattern (`*` and `?`), since remote stores typically only support glob
/// matching.
#[async_trait]
pub trait CacheAdapter<T>: Debug + Send + Sync {
	/// Load the entry stored under `key`.
	async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>>;

	/// Store `entry` under `key`, replacing any previous entry.
	async fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<()>;

	/// Remove `key`, reporting whether an entry existed.
	async fn delete(&self, key: &str) -> Result<bool>;

	/// Whether an entry is stored under `key`.
	async fn has(&self, key: &str) -> Result<bool>;

	/// Remove every entry owned by this adapter.
	async fn clear(&self) -> Result<()>;

	/// List stored keys matching a glob pattern.
	async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Process-local adapter backed by a hash map.
///
/// Useful for sharing one store between several [`Cache`](crate::cache::Cache) handles and as a
/// reference implementation of the adapter contract.
#[derive(Debug)]
pub struct MemoryAdapter<T> {
	entries: Mutex<HashMap<String, CacheEntry<T>>>,
}
impl<T> MemoryAdapter<T> {
	/// Create an empty adapter.
	pub fn new() -> Self {
		Self { entries: Mutex::new(HashMap::new()) }
	}

	/// Number of stored entries, expired or not.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether the adapter holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}
impl<T> Default for MemoryAdapter<T> {
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait]
impl<T> CacheAdapter<T> for MemoryAdapter<T>
where
	T: Clone + Debug + Send + Sync + 'static,
{
	async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, entry: CacheEntry<T>) -> Result<()> {
		self.entries.lock().insert(key.to_owned(), entry);

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<bool> {
		Ok(self.entries.lock().remove(key).is_some())
	}

	async fn has(&self, key: &str) -> Result<bool> {
		Ok(self.entries.lock().contains_key(key))
	}

	async fn clear(&self) -> Result<()> {
		self.entries.lock().clear();

		Ok(())
	}

	async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
		let matcher = WildMatch::new(pattern);
		let mut keys = self
			.entries
			.lock()
			.keys()
			.filter(|key| matcher.matches(key))
			.cloned()
			.collect::<Vec<_>>();

		keys.sort_unstable();

		Ok(keys)
	}
}
