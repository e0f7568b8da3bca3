//! Composable retry predicates.

// self
use crate::{_prelude::*, error::ErrorKind, retry::config::RetryPredicate};

/// Retry when the error's status code is one of `codes`.
pub fn retry_on_status_codes<I>(codes: I) -> RetryPredicate
where
	I: IntoIterator<Item = u16>,
{
	let codes = codes.into_iter().collect::<Vec<_>>();

	Arc::new(move |error, _| codes.contains(&error.status_code()))
}

/// Retry when the error's kind is one of `kinds`.
pub fn retry_on_error_types<I>(kinds: I) -> RetryPredicate
where
	I: IntoIterator<Item = ErrorKind>,
{
	let kinds = kinds.into_iter().collect::<Vec<_>>();

	Arc::new(move |error, _| kinds.contains(&error.kind()))
}

/// Retry when any of `predicates` accepts the error.
///
/// An empty set never retries.
pub fn combine_predicates<I>(predicates: I) -> RetryPredicate
where
	I: IntoIterator<Item = RetryPredicate>,
{
	let predicates = predicates.into_iter().collect::<Vec<_>>();

	Arc::new(move |error, attempt| predicates.iter().any(|predicate| predicate(error, attempt)))
}

/// Gate `predicate` so attempts past `max_attempts` never retry.
pub fn with_max_attempts(predicate: RetryPredicate, max_attempts: u32) -> RetryPredicate {
	Arc::new(move |error, attempt| attempt <= max_attempts && predicate(error, attempt))
}
