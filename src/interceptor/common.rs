//! Ready-made interceptors for authentication, headers, timing, logging, payload unwrapping, and
//! recovery-driven retries.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
};
// crates.io
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, header::AUTHORIZATION};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	interceptor::{
		chain::{ErrorInterceptor, RequestInterceptor, ResponseInterceptor},
		types::{ErrorContext, ErrorOutcome, InterceptorResponse, Metadata, RequestConfig},
	},
};

/// Metadata key holding the request start time in Unix milliseconds.
pub const START_TIME_KEY: &str = "startTime";

/// Inject `Authorization: Bearer {token}` when `token_source` yields a non-empty token.
pub fn bearer_auth<F, Fut>(token_source: F) -> BearerAuth<F>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Option<String>> + Send + 'static,
{
	BearerAuth { token_source }
}

/// Interceptor returned by [`bearer_auth`].
pub struct BearerAuth<F> {
	token_source: F,
}
impl<F> Debug for BearerAuth<F> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("BearerAuth").finish_non_exhaustive()
	}
}
#[async_trait]
impl<F, Fut> RequestInterceptor for BearerAuth<F>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Option<String>> + Send + 'static,
{
	async fn on_request(&self, mut config: RequestConfig) -> Result<RequestConfig> {
		let Some(token) = (self.token_source)().await.filter(|token| !token.is_empty()) else {
			return Ok(config);
		};
		let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
			Error::custom(format!("Invalid bearer token: {e}."), 400, "INVALID_HEADER")
		})?;

		value.set_sensitive(true);
		config.headers.insert(AUTHORIZATION, value);

		Ok(config)
	}
}

/// Fixed or computed header set.
#[derive(Clone)]
pub enum HeaderSource {
	/// Same headers on every request.
	Static(HeaderMap),
	/// Headers computed per request.
	Dynamic(Arc<dyn Fn() -> HeaderMap + Send + Sync>),
}
impl HeaderSource {
	/// Compute headers per request with `f`.
	pub fn dynamic<F>(f: F) -> Self
	where
		F: Fn() -> HeaderMap + Send + Sync + 'static,
	{
		Self::Dynamic(Arc::new(f))
	}

	fn resolve(&self) -> HeaderMap {
		match self {
			Self::Static(headers) => headers.clone(),
			Self::Dynamic(f) => f(),
		}
	}
}
impl From<HeaderMap> for HeaderSource {
	fn from(value: HeaderMap) -> Self {
		Self::Static(value)
	}
}
impl Debug for HeaderSource {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
			Self::Dynamic(_) => f.write_str("Dynamic"),
		}
	}
}

/// Merge `source` into every request, replacing same-named headers.
pub fn headers(source: impl Into<HeaderSource>) -> Headers {
	Headers { source: source.into() }
}

/// Interceptor returned by [`headers`].
#[derive(Clone, Debug)]
pub struct Headers {
	source: HeaderSource,
}
#[async_trait]
impl RequestInterceptor for Headers {
	async fn on_request(&self, mut config: RequestConfig) -> Result<RequestConfig> {
		config.headers.extend(self.source.resolve());

		Ok(config)
	}
}

/// Stamp [`START_TIME_KEY`] on each request so later stages can compute durations.
pub fn timing() -> Timing {
	Timing
}

/// Interceptor returned by [`timing`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Timing;
#[async_trait]
impl RequestInterceptor for Timing {
	async fn on_request(&self, mut config: RequestConfig) -> Result<RequestConfig> {
		config.metadata.insert(START_TIME_KEY.into(), Value::from(Utc::now().timestamp_millis()));

		Ok(config)
	}
}

/// Pipeline stage a [`LogRecord`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogPhase {
	/// Outgoing request.
	Request,
	/// Successful response.
	Response,
	/// Failure.
	Error,
}

/// Structured log line emitted by the logging interceptors.
#[derive(Clone, Debug)]
pub struct LogRecord {
	/// Wall-clock emission time.
	pub timestamp: DateTime<Utc>,
	/// Pipeline stage.
	pub phase: LogPhase,
	/// Request method.
	pub method: Method,
	/// Request URL.
	pub url: String,
	/// Response or error status.
	pub status: Option<u16>,
	/// Elapsed time since [`timing`] stamped the request.
	pub duration: Option<Duration>,
	/// Error message.
	pub error: Option<String>,
}

/// Destination for [`LogRecord`]s.
pub trait LogSink: Send + Sync {
	/// Consume one record.
	fn log(&self, record: &LogRecord);
}
impl<F> LogSink for F
where
	F: Fn(&LogRecord) + Send + Sync,
{
	fn log(&self, record: &LogRecord) {
		self(record)
	}
}

/// Default sink emitting `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;
impl LogSink for TracingSink {
	fn log(&self, record: &LogRecord) {
		let duration_ms = record.duration.map(|duration| duration.as_millis() as u64);

		match record.phase {
			LogPhase::Request => {
				tracing::info!(method = %record.method, url = %record.url, "api request");
			},
			LogPhase::Response => {
				tracing::info!(
					method = %record.method,
					url = %record.url,
					status = record.status,
					duration_ms,
					"api response"
				);
			},
			LogPhase::Error => {
				tracing::warn!(
					method = %record.method,
					url = %record.url,
					status = record.status,
					error = record.error.as_deref(),
					"api error"
				);
			},
		}
	}
}

/// Log outgoing requests.
pub fn log_request() -> Logger {
	Logger::default()
}

/// Log successful responses, including the duration when [`timing`] ran.
pub fn log_response() -> Logger {
	Logger::default()
}

/// Log failures; the error is propagated unchanged.
pub fn log_error() -> Logger {
	Logger::default()
}

/// Logging interceptor usable in any of the three chains.
#[derive(Clone)]
pub struct Logger {
	sink: Arc<dyn LogSink>,
}
impl Logger {
	/// Route records to `sink` instead of `tracing`.
	pub fn with_sink<S>(mut self, sink: S) -> Self
	where
		S: LogSink + 'static,
	{
		self.sink = Arc::new(sink);

		self
	}

	fn emit(
		&self,
		phase: LogPhase,
		request: &RequestConfig,
		status: Option<u16>,
		error: Option<String>,
	) {
		let duration = match phase {
			LogPhase::Response => elapsed_since_start(&request.metadata),
			_ => None,
		};

		self.sink.log(&LogRecord {
			timestamp: Utc::now(),
			phase,
			method: request.method.clone(),
			url: request.url.clone(),
			status,
			duration,
			error,
		});
	}
}
impl Default for Logger {
	fn default() -> Self {
		Self { sink: Arc::new(TracingSink) }
	}
}
impl Debug for Logger {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Logger").finish_non_exhaustive()
	}
}
#[async_trait]
impl RequestInterceptor for Logger {
	async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig> {
		self.emit(LogPhase::Request, &config, None, None);

		Ok(config)
	}
}
#[async_trait]
impl ResponseInterceptor for Logger {
	async fn on_response(&self, response: InterceptorResponse) -> Result<InterceptorResponse> {
		self.emit(LogPhase::Response, &response.config, Some(response.status.as_u16()), None);

		Ok(response)
	}
}
#[async_trait]
impl ErrorInterceptor for Logger {
	async fn on_error(&self, context: ErrorContext) -> ErrorOutcome {
		let status = context
			.response
			.as_ref()
			.map(|response| response.status.as_u16())
			.unwrap_or_else(|| context.error.status_code());

		self.emit(LogPhase::Error, &context.request, Some(status), Some(context.error.to_string()));

		ErrorOutcome::Propagate(context.error)
	}
}

/// Replace `response.data` with the value at dot-separated `path` when the full path resolves.
pub fn unwrap_data(path: &str) -> UnwrapData {
	let pointer = path
		.split('.')
		.filter(|segment| !segment.is_empty())
		.map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
		.collect();

	UnwrapData { pointer }
}

/// Interceptor returned by [`unwrap_data`].
#[derive(Clone, Debug)]
pub struct UnwrapData {
	pointer: String,
}
#[async_trait]
impl ResponseInterceptor for UnwrapData {
	async fn on_response(&self, mut response: InterceptorResponse) -> Result<InterceptorResponse> {
		if let Some(nested) = response.data.pointer(&self.pointer) {
			response.data = nested.clone();
		}

		Ok(response)
	}
}

/// Ask the caller to re-issue the request after `on_retry` completes, when `should_retry`
/// accepts the error.
///
/// A failing `on_retry` propagates its own error. Rejected errors propagate unchanged.
pub fn retry_on_error<P, R, Fut>(should_retry: P, on_retry: R) -> RetryOnError<P, R>
where
	P: Fn(&Error) -> bool + Send + Sync + 'static,
	R: Fn(Error) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	RetryOnError { should_retry, on_retry }
}

/// Interceptor returned by [`retry_on_error`].
pub struct RetryOnError<P, R> {
	should_retry: P,
	on_retry: R,
}
impl<P, R> Debug for RetryOnError<P, R> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RetryOnError").finish_non_exhaustive()
	}
}
#[async_trait]
impl<P, R, Fut> ErrorInterceptor for RetryOnError<P, R>
where
	P: Fn(&Error) -> bool + Send + Sync + 'static,
	R: Fn(Error) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	async fn on_error(&self, context: ErrorContext) -> ErrorOutcome {
		if !(self.should_retry)(&context.error) {
			return ErrorOutcome::Propagate(context.error);
		}

		match (self.on_retry)(context.error.clone()).await {
			Ok(()) => {
				tracing::debug!(error = %context.error, "recovery completed, requesting retry");

				ErrorOutcome::Retry
			},
			Err(error) => ErrorOutcome::Propagate(error),
		}
	}
}

fn elapsed_since_start(metadata: &Metadata) -> Option<Duration> {
	let started = metadata.get(START_TIME_KEY)?.as_i64()?;
	let elapsed = Utc::now().timestamp_millis().saturating_sub(started).max(0);

	Some(Duration::from_millis(elapsed as u64))
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use http::{HeaderName, StatusCode};
	use parking_lot::Mutex;
	use serde_json::json;
	// self
	use super::*;
	use crate::error::ErrorKind;

	fn request() -> RequestConfig {
		RequestConfig::new(Method::GET, "/products")
	}

	fn response(data: Value) -> InterceptorResponse {
		InterceptorResponse {
			data,
			status: StatusCode::OK,
			headers: HeaderMap::new(),
			config: request(),
			metadata: Metadata::new(),
		}
	}

	fn context(error: Error) -> ErrorContext {
		ErrorContext { error, request: request(), response: None }
	}

	#[tokio::test]
	async fn bearer_auth_injects_only_present_tokens() -> Result<()> {
		let with_token = bearer_auth(|| async { Some("secret".to_owned()) });
		let without_token = bearer_auth(|| async { None });
		let config = with_token.on_request(request()).await?;

		assert_eq!(config.headers[AUTHORIZATION], "Bearer secret");
		assert!(config.headers[AUTHORIZATION].is_sensitive());

		let config = without_token.on_request(request()).await?;

		assert!(!config.headers.contains_key(AUTHORIZATION));

		Ok(())
	}

	#[tokio::test]
	async fn header_sources_merge_over_existing_values() -> Result<()> {
		let tenant = HeaderName::from_static("x-tenant");
		let mut fixed = HeaderMap::new();

		fixed.insert(tenant.clone(), HeaderValue::from_static("store-1"));

		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let dynamic = headers(HeaderSource::dynamic(move || {
			let mut map = HeaderMap::new();
			let n = counter.fetch_add(1, Ordering::SeqCst);

			map.insert(HeaderName::from_static("x-request-id"), HeaderValue::from(n));

			map
		}));
		let mut config = request();

		config.headers.insert(tenant.clone(), HeaderValue::from_static("stale"));

		let config = headers(fixed).on_request(config).await?;
		let config = dynamic.on_request(config).await?;
		let config = dynamic.on_request(config).await?;

		assert_eq!(config.headers[&tenant], "store-1");
		assert_eq!(config.headers.get_all(&tenant).iter().count(), 1);
		assert_eq!(config.headers["x-request-id"], "1");
		assert_eq!(calls.load(Ordering::SeqCst), 2);

		Ok(())
	}

	#[tokio::test]
	async fn loggers_report_duration_and_errors_to_the_sink() -> Result<()> {
		let records = Arc::new(Mutex::new(Vec::<LogRecord>::new()));
		let sink = {
			let records = records.clone();

			move |record: &LogRecord| records.lock().push(record.clone())
		};
		let logger = log_response().with_sink(sink);
		let config = timing().on_request(request()).await?;

		assert!(config.metadata[START_TIME_KEY].is_i64());

		logger.on_request(config.clone()).await?;
		logger.on_response(InterceptorResponse { config, ..response(json!(null)) }).await?;

		let outcome = logger.on_error(context(Error::not_found("Product", Some("42".into())))).await;

		assert!(matches!(outcome, ErrorOutcome::Propagate(error) if error.kind() == ErrorKind::NotFound));

		let records = records.lock();

		assert_eq!(
			records.iter().map(|record| record.phase).collect::<Vec<_>>(),
			vec![LogPhase::Request, LogPhase::Response, LogPhase::Error]
		);
		assert!(records[0].duration.is_none());
		assert!(records[1].duration.is_some());
		assert_eq!(records[1].status, Some(200));
		assert_eq!(records[2].status, Some(404));
		assert_eq!(records[2].error.as_deref(), Some("Product with identifier '42' not found"));

		Ok(())
	}

	#[tokio::test]
	async fn unwrap_data_descends_only_when_the_path_resolves() -> Result<()> {
		let payload = json!({ "data": { "result": [1, 2, 3] } });
		let unwrapped = unwrap_data("data.result").on_response(response(payload.clone())).await?;

		assert_eq!(unwrapped.data, json!([1, 2, 3]));

		let untouched = unwrap_data("data.missing").on_response(response(payload.clone())).await?;

		assert_eq!(untouched.data, payload);

		Ok(())
	}

	#[tokio::test]
	async fn retry_on_error_requests_retry_after_recovery() {
		let refreshed = Arc::new(AtomicUsize::new(0));
		let counter = refreshed.clone();
		let interceptor = retry_on_error(
			|error| error.kind() == ErrorKind::Authentication,
			move |_| {
				counter.fetch_add(1, Ordering::SeqCst);

				async { Ok(()) }
			},
		);

		assert!(matches!(
			interceptor.on_error(context(Error::authentication("expired"))).await,
			ErrorOutcome::Retry
		));
		assert!(matches!(
			interceptor.on_error(context(Error::validation("bad", Vec::new()))).await,
			ErrorOutcome::Propagate(error) if error.kind() == ErrorKind::Validation
		));
		assert_eq!(refreshed.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn failed_recovery_propagates_its_own_error() {
		let interceptor = retry_on_error(
			|_| true,
			|_| async { Err(Error::authorization("refresh rejected")) },
		);
		let outcome = interceptor.on_error(context(Error::authentication("expired"))).await;

		assert!(matches!(outcome, ErrorOutcome::Propagate(error) if error.kind() == ErrorKind::Authorization));
	}
}
