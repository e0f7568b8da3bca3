//! Retry loop execution with cancellation and timeout helpers.

// std
use std::future::Future;
// crates.io
use tokio::time;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	metrics,
	retry::config::{RetryConfig, RetryOverrides, calculate_delay},
};

/// Successful outcome of a retry loop.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryResult<T> {
	/// Value produced by the successful attempt.
	pub data: T,
	/// Total attempts made, including the successful one.
	pub attempts: u32,
	/// Elapsed time from the first attempt to success.
	pub total_time: Duration,
}

/// Reusable retry executor bound to a default configuration.
#[derive(Clone, Debug, Default)]
pub struct RetryHandler {
	config: RetryConfig,
}
impl RetryHandler {
	/// Create a handler using the supplied defaults.
	pub fn new(config: RetryConfig) -> Self {
		Self { config }
	}

	/// Default configuration applied to every execution.
	pub fn config(&self) -> &RetryConfig {
		&self.config
	}

	/// Run `operation` under the handler's default configuration.
	pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<RetryResult<T>>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		with_retry(operation, &self.config).await
	}

	/// Run `operation` with per-call overrides merged over the defaults.
	pub async fn execute_with<T, F, Fut>(
		&self,
		operation: F,
		overrides: RetryOverrides,
	) -> Result<RetryResult<T>>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		with_retry(operation, &self.config.merge(overrides)).await
	}
}

/// Build a [`RetryHandler`] with the supplied defaults.
pub fn create_retry_handler(config: RetryConfig) -> RetryHandler {
	RetryHandler::new(config)
}

/// Run `operation` until it succeeds, the failure is not retryable, retries run out, or the
/// configured signal fires.
///
/// Every terminal failure after at least one attempt is reported as
/// [`Error::RetryExhausted`] wrapping the last operation error. A signal that is already
/// cancelled before the first attempt yields [`Error::Aborted`] without invoking `operation`.
pub async fn with_retry<T, F, Fut>(mut operation: F, config: &RetryConfig) -> Result<RetryResult<T>>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	if config.is_cancelled() {
		tracing::debug!("retry loop cancelled before first attempt");

		return Err(Error::aborted());
	}

	let mut state = RetryLoop::new(config);

	loop {
		let attempt = state.begin_attempt();

		match operation().await {
			Ok(data) => {
				metrics::record_retry_outcome(true);

				if attempt > 1 {
					tracing::debug!(attempt, "operation succeeded after retry");
				}

				return Ok(RetryResult { data, attempts: attempt, total_time: state.elapsed() });
			},
			Err(error) => {
				let Some(delay) = state.next_backoff(&error) else {
					metrics::record_retry_outcome(false);

					return Err(Error::retry_exhausted(attempt, error));
				};

				if let Some(on_retry) = &config.on_retry {
					on_retry(&error, attempt, delay);
				}

				metrics::record_retry_attempt(error.name());

				if !sleep_or_cancel(delay, config.signal.as_ref()).await {
					tracing::debug!(attempt, "retry loop cancelled during backoff");
					metrics::record_retry_outcome(false);

					return Err(Error::retry_exhausted(attempt, error));
				}
			},
		}
	}
}

/// Bound `future` by `timeout`, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, Fut>(timeout: Duration, future: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	time::timeout(timeout, future).await.map_err(|_| Error::timeout(timeout))?
}

/// Race `future` against `signal`, mapping cancellation to [`Error::Aborted`].
pub async fn with_cancellation<T, Fut>(signal: &CancellationToken, future: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	if signal.is_cancelled() {
		return Err(Error::aborted());
	}

	tokio::select! {
		biased;

		_ = signal.cancelled() => Err(Error::aborted()),
		result = future => result,
	}
}

// Tracks attempt numbering and backoff progression for one loop.
#[derive(Debug)]
struct RetryLoop<'a> {
	config: &'a RetryConfig,
	started: Instant,
	attempts: u32,
}
impl<'a> RetryLoop<'a> {
	fn new(config: &'a RetryConfig) -> Self {
		Self { config, started: Instant::now(), attempts: 0 }
	}

	fn begin_attempt(&mut self) -> u32 {
		self.attempts = self.attempts.saturating_add(1);

		self.attempts
	}

	fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	fn can_retry(&self) -> bool {
		self.attempts <= self.config.max_retries
	}

	fn next_backoff(&self, error: &Error) -> Option<Duration> {
		if self.config.is_cancelled() {
			tracing::debug!(attempt = self.attempts, error = %error, "retry loop cancelled");

			return None;
		}
		if !self.can_retry() {
			tracing::debug!(attempt = self.attempts, error = %error, "retry budget exhausted");

			return None;
		}
		if !self.config.is_retryable(error, self.attempts) {
			tracing::debug!(attempt = self.attempts, error = %error, "error is not retryable");

			return None;
		}

		let mut delay = calculate_delay(self.attempts, self.config);

		// Server-provided hints are a floor, still capped by the configured ceiling.
		if let Some(retry_after) = error.retry_after() {
			delay = delay.max(retry_after).min(self.config.max_delay);
		}

		tracing::debug!(attempt = self.attempts, ?delay, error = %error, "retry backoff computed");

		Some(delay)
	}
}

async fn sleep_or_cancel(delay: Duration, signal: Option<&CancellationToken>) -> bool {
	match signal {
		Some(signal) => tokio::select! {
			biased;

			_ = signal.cancelled() => false,
			_ = time::sleep(delay) => !signal.is_cancelled(),
		},
		None => {
			if !delay.is_zero() {
				time::sleep(delay).await;
			}

			true
		},
	}
}
