//! Async API client core: a freshness-aware LRU response cache, an exponential-backoff retry
//! engine, and a request/response/error interceptor pipeline with error recovery.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod client;
pub mod interceptor;
pub mod metrics;
pub mod retry;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	cache::{Cache, CacheAdapter, CacheConfig, MemoryAdapter, SetOptions, generate_cache_key},
	client::{ApiClient, ApiClientBuilder, ApiClientConfig, ReqwestTransport, Transport},
	error::{
		Cause, Error, ErrorKind, FieldError, Result, SerializedError, has_error_code, is_api_error,
	},
	interceptor::{
		ApiResponse, ErrorOutcome, InterceptorManager, RequestConfig, RequestOptions,
		to_api_response, to_request_config,
	},
	retry::{
		JitterStrategy, RetryConfig, RetryHandler, RetryResult, calculate_delay,
		create_retry_handler, with_retry,
	},
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
