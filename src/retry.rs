//! Retry engine: backoff calculation, retry-loop execution, and composable retry predicates.

pub mod config;
pub mod executor;
pub mod predicate;

pub use config::{
	JitterStrategy, RetryCallback, RetryConfig, RetryOverrides, RetryPredicate, calculate_delay,
};
pub use executor::{
	RetryHandler, RetryResult, create_retry_handler, with_cancellation, with_retry, with_timeout,
};
pub use predicate::{
	combine_predicates, retry_on_error_types, retry_on_status_codes, with_max_attempts,
};
