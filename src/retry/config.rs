//! Retry configuration and backoff calculation.

// std
use std::{
	cell::RefCell,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
// self
use crate::{_prelude::*, error::ErrorKind};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default exponential growth factor.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.;

/// Decides whether a failed attempt should be retried; receives the 1-based attempt number.
pub type RetryPredicate = Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>;
/// Observes a scheduled retry: the error, the failed attempt number, and the chosen delay.
pub type RetryCallback = Arc<dyn Fn(&Error, u32, Duration) + Send + Sync>;

/// Supported jitter strategies for retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; uniform delay between zero and the computed backoff.
	#[default]
	Full,
}

/// Retry configuration for a single retry loop.
#[derive(Clone)]
pub struct RetryConfig {
	/// Retries permitted after the initial attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	pub initial_delay: Duration,
	/// Upper bound on any single delay.
	pub max_delay: Duration,
	/// Growth factor applied per attempt.
	pub backoff_multiplier: f64,
	/// Randomization applied to each delay.
	pub jitter: JitterStrategy,
	/// HTTP statuses considered retryable.
	pub retry_on_status: Vec<u16>,
	/// Error kinds considered retryable.
	pub retry_on_error: Vec<ErrorKind>,
	/// Custom retryability decision; takes precedence over the status and kind lists.
	pub should_retry: Option<RetryPredicate>,
	/// Invoked before sleeping ahead of each retry.
	pub on_retry: Option<RetryCallback>,
	/// Cancels the loop before an attempt or during a delay.
	pub signal: Option<CancellationToken>,
}
impl RetryConfig {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1. {
			return Err(Error::invalid_config(
				"retry.backoff_multiplier",
				"Must be a finite number greater than or equal to 1.",
			));
		}
		if self.max_delay < self.initial_delay {
			return Err(Error::invalid_config(
				"retry.max_delay",
				"Must be greater than or equal to initial_delay.",
			));
		}

		Ok(())
	}

	/// Install a custom retry predicate.
	pub fn with_should_retry<F>(mut self, predicate: F) -> Self
	where
		F: Fn(&Error, u32) -> bool + Send + Sync + 'static,
	{
		self.should_retry = Some(Arc::new(predicate));

		self
	}

	/// Install a retry observer.
	pub fn with_on_retry<F>(mut self, callback: F) -> Self
	where
		F: Fn(&Error, u32, Duration) + Send + Sync + 'static,
	{
		self.on_retry = Some(Arc::new(callback));

		self
	}

	/// Attach a cancellation token.
	pub fn with_signal(mut self, signal: CancellationToken) -> Self {
		self.signal = Some(signal);

		self
	}

	/// Apply caller overrides; every provided field wins over the current value.
	pub fn merge(&self, overrides: RetryOverrides) -> Self {
		let mut merged = self.clone();

		if let Some(value) = overrides.max_retries {
			merged.max_retries = value;
		}
		if let Some(value) = overrides.initial_delay {
			merged.initial_delay = value;
		}
		if let Some(value) = overrides.max_delay {
			merged.max_delay = value;
		}
		if let Some(value) = overrides.backoff_multiplier {
			merged.backoff_multiplier = value;
		}
		if let Some(value) = overrides.jitter {
			merged.jitter = value;
		}
		if let Some(value) = overrides.retry_on_status {
			merged.retry_on_status = value;
		}
		if let Some(value) = overrides.retry_on_error {
			merged.retry_on_error = value;
		}
		if overrides.should_retry.is_some() {
			merged.should_retry = overrides.should_retry;
		}
		if overrides.on_retry.is_some() {
			merged.on_retry = overrides.on_retry;
		}
		if overrides.signal.is_some() {
			merged.signal = overrides.signal;
		}

		merged
	}

	/// Decide whether `error`, raised by attempt number `attempt`, may be retried.
	///
	/// A custom predicate wins. Otherwise, when either list is configured, the error's status or
	/// kind must appear in it. With neither, only network, timeout, and rate-limit failures retry.
	pub fn is_retryable(&self, error: &Error, attempt: u32) -> bool {
		if let Some(predicate) = &self.should_retry {
			return predicate(error, attempt);
		}
		if !self.retry_on_status.is_empty() || !self.retry_on_error.is_empty() {
			return self.retry_on_status.contains(&error.status_code())
				|| self.retry_on_error.contains(&error.kind());
		}

		error.kind().is_transient()
	}

	/// Whether the attached token has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.signal.as_ref().is_some_and(CancellationToken::is_cancelled)
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: DEFAULT_MAX_RETRIES,
			initial_delay: DEFAULT_INITIAL_DELAY,
			max_delay: DEFAULT_MAX_DELAY,
			backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
			jitter: JitterStrategy::Full,
			retry_on_status: Vec::new(),
			retry_on_error: Vec::new(),
			should_retry: None,
			on_retry: None,
			signal: None,
		}
	}
}
impl Debug for RetryConfig {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RetryConfig")
			.field("max_retries", &self.max_retries)
			.field("initial_delay", &self.initial_delay)
			.field("max_delay", &self.max_delay)
			.field("backoff_multiplier", &self.backoff_multiplier)
			.field("jitter", &self.jitter)
			.field("retry_on_status", &self.retry_on_status)
			.field("retry_on_error", &self.retry_on_error)
			.field("should_retry", &self.should_retry.is_some())
			.field("on_retry", &self.on_retry.is_some())
			.field("signal", &self.signal)
			.finish()
	}
}

/// Per-call overrides merged over a handler's default [`RetryConfig`].
#[derive(Clone, Default)]
pub struct RetryOverrides {
	/// Override for [`RetryConfig::max_retries`].
	pub max_retries: Option<u32>,
	/// Override for [`RetryConfig::initial_delay`].
	pub initial_delay: Option<Duration>,
	/// Override for [`RetryConfig::max_delay`].
	pub max_delay: Option<Duration>,
	/// Override for [`RetryConfig::backoff_multiplier`].
	pub backoff_multiplier: Option<f64>,
	/// Override for [`RetryConfig::jitter`].
	pub jitter: Option<JitterStrategy>,
	/// Override for [`RetryConfig::retry_on_status`].
	pub retry_on_status: Option<Vec<u16>>,
	/// Override for [`RetryConfig::retry_on_error`].
	pub retry_on_error: Option<Vec<ErrorKind>>,
	/// Override for [`RetryConfig::should_retry`].
	pub should_retry: Option<RetryPredicate>,
	/// Override for [`RetryConfig::on_retry`].
	pub on_retry: Option<RetryCallback>,
	/// Override for [`RetryConfig::signal`].
	pub signal: Option<CancellationToken>,
}
impl Debug for RetryOverrides {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RetryOverrides")
			.field("max_retries", &self.max_retries)
			.field("initial_delay", &self.initial_delay)
			.field("max_delay", &self.max_delay)
			.field("backoff_multiplier", &self.backoff_multiplier)
			.field("jitter", &self.jitter)
			.finish_non_exhaustive()
	}
}

/// Compute the delay following failed attempt number `attempt` (1-based).
///
/// The base delay is `initial_delay * backoff_multiplier^(attempt - 1)`, clamped to `max_delay`.
/// Full jitter draws uniformly from `[0, clamped]`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
	let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
	let ceiling = config.max_delay.as_secs_f64();
	let base = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
	let bounded = if base.is_finite() { base.min(ceiling) } else { ceiling };

	match config.jitter {
		JitterStrategy::None => Duration::from_secs_f64(bounded),
		JitterStrategy::Full => random_within(Duration::from_secs_f64(bounded)),
	}
}

fn random_within(max: Duration) -> Duration {
	if max.is_zero() {
		return Duration::ZERO;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = rng.random_range(0..=max.as_nanos().min(u64::MAX as u128) as u64);

		Duration::from_nanos(nanos)
	})
}
