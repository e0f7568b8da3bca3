//! High-level API client composing interceptors, the response cache, and the retry engine.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{Cache, CacheKeyParts, SetOptions, generate_cache_key},
	client::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse},
	interceptor::{
		ApiResponse, ErrorContext, ErrorOutcome, InterceptorManager, InterceptorResponse,
		RequestConfig, RequestOptions, common::bearer_auth, to_api_response, to_request_config,
	},
	retry::{RetryConfig, RetryHandler, RetryOverrides, with_cancellation, with_timeout},
};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of pipeline re-runs an error interceptor may request.
pub const DEFAULT_MAX_RECOVERY_RETRIES: u32 = 1;

/// Client-wide settings.
#[derive(Clone, Debug)]
pub struct ApiClientConfig {
	/// Base URL relative request paths resolve against.
	pub base_url: Option<String>,
	/// Headers sent with every request, under per-request overrides.
	pub default_headers: HeaderMap,
	/// Per-request timeout when the request does not set one.
	pub timeout: Duration,
	/// Static bearer token injected by an auth interceptor.
	pub auth_token: Option<String>,
	/// Bound on [`ErrorOutcome::Retry`] re-runs per call.
	pub max_recovery_retries: u32,
}
impl ApiClientConfig {
	/// Validate invariants for client configuration.
	pub fn validate(&self) -> Result<()> {
		if self.timeout.is_zero() {
			return Err(Error::invalid_config("client.timeout", "Must be greater than zero."));
		}
		if let Some(base_url) = &self.base_url {
			let url = Url::parse(base_url)?;

			if !matches!(url.scheme(), "http" | "https") {
				return Err(Error::invalid_config("client.base_url", "Must use http or https."));
			}
		}

		Ok(())
	}
}
impl Default for ApiClientConfig {
	fn default() -> Self {
		Self {
			base_url: None,
			default_headers: HeaderMap::new(),
			timeout: DEFAULT_TIMEOUT,
			auth_token: None,
			max_recovery_retries: DEFAULT_MAX_RECOVERY_RETRIES,
		}
	}
}

/// Builder for [`ApiClient`].
#[derive(Debug, Default)]
pub struct ApiClientBuilder {
	config: ApiClientConfig,
	transport: Option<Arc<dyn Transport>>,
	cache: Option<Cache<Value>>,
	retry: Option<RetryConfig>,
}
impl ApiClientBuilder {
	/// Create a builder with default settings.
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the client settings wholesale.
	pub fn config(mut self, config: ApiClientConfig) -> Self {
		self.config = config;

		self
	}

	/// Set the base URL.
	pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.base_url = Some(base_url.into());

		self
	}

	/// Add a default header.
	pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.config.default_headers.insert(name, value);

		self
	}

	/// Override the per-request timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;

		self
	}

	/// Authenticate every request with a static bearer token.
	pub fn auth_token(mut self, token: impl Into<String>) -> Self {
		self.config.auth_token = Some(token.into());

		self
	}

	/// Bound error-interceptor driven re-runs.
	pub fn max_recovery_retries(mut self, retries: u32) -> Self {
		self.config.max_recovery_retries = retries;

		self
	}

	/// Use a custom transport.
	pub fn transport<T>(mut self, transport: T) -> Self
	where
		T: 'static + Transport,
	{
		self.transport = Some(Arc::new(transport));

		self
	}

	/// Cache GET responses in `cache`.
	pub fn cache(mut self, cache: Cache<Value>) -> Self {
		self.cache = Some(cache);

		self
	}

	/// Retry failed attempts under `config`.
	pub fn retry(mut self, config: RetryConfig) -> Self {
		self.retry = Some(config);

		self
	}

	/// Validate the configuration and build the client.
	pub fn build(self) -> Result<ApiClient> {
		self.config.validate()?;

		if let Some(retry) = &self.retry {
			retry.validate()?;
		}

		let base_url = self.config.base_url.as_deref().map(parse_base_url).transpose()?;
		let interceptors = InterceptorManager::new();

		if let Some(token) = self.config.auth_token {
			interceptors.use_request(bearer_auth(move || {
				let token = token.clone();

				async move { Some(token) }
			}));
		}

		Ok(ApiClient {
			inner: Arc::new(ClientInner {
				base_url,
				default_headers: self.config.default_headers,
				timeout: self.config.timeout,
				max_recovery_retries: self.config.max_recovery_retries,
				transport: self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
				cache: self.cache,
				retry: self.retry.map(RetryHandler::new),
				interceptors,
			}),
		})
	}
}

/// Cheaply cloneable API client.
#[derive(Clone)]
pub struct ApiClient {
	inner: Arc<ClientInner>,
}
impl ApiClient {
	/// Build a client from `config` with the default transport.
	pub fn new(config: ApiClientConfig) -> Result<Self> {
		ApiClientBuilder::new().config(config).build()
	}

	/// Create an [`ApiClientBuilder`].
	pub fn builder() -> ApiClientBuilder {
		ApiClientBuilder::new()
	}

	/// Interceptor chains applied to every request.
	pub fn interceptors(&self) -> &InterceptorManager {
		&self.inner.interceptors
	}

	/// Response cache, when configured.
	pub fn cache(&self) -> Option<&Cache<Value>> {
		self.inner.cache.as_ref()
	}

	/// Issue a GET request.
	pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
		self.request(Method::GET, path, options).await
	}

	/// Issue a POST request with a JSON body.
	pub async fn post(
		&self,
		path: &str,
		body: Value,
		options: RequestOptions,
	) -> Result<ApiResponse> {
		self.request(Method::POST, path, options.body(body)).await
	}

	/// Issue a PUT request with a JSON body.
	pub async fn put(
		&self,
		path: &str,
		body: Value,
		options: RequestOptions,
	) -> Result<ApiResponse> {
		self.request(Method::PUT, path, options.body(body)).await
	}

	/// Issue a PATCH request with a JSON body.
	pub async fn patch(
		&self,
		path: &str,
		body: Value,
		options: RequestOptions,
	) -> Result<ApiResponse> {
		self.request(Method::PATCH, path, options.body(body)).await
	}

	/// Issue a DELETE request.
	pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
		self.request(Method::DELETE, path, options).await
	}

	/// Run the full request pipeline.
	///
	/// Request interceptors run first. Cacheable GETs are then served from the cache when
	/// possible, with stale entries refreshed in the background. Otherwise the transport is called,
	/// under the retry engine when configured; failures go through the error interceptors, which
	/// may recover or request a bounded re-run of the whole pipeline.
	#[tracing::instrument(skip(self, options))]
	pub async fn request(
		&self,
		method: Method,
		path: &str,
		mut options: RequestOptions,
	) -> Result<ApiResponse> {
		let use_cache = method == Method::GET && !options.skip_cache;
		let mut headers = self.inner.default_headers.clone();

		headers.extend(std::mem::take(&mut options.headers));

		options.headers = headers;
		options.timeout.get_or_insert(self.inner.timeout);

		let initial = to_request_config(method, path, options);
		let mut recoveries = 0;

		loop {
			let config = self.inner.interceptors.run_request_interceptors(&initial).await?;
			let cache_key = use_cache.then(|| response_cache_key(&config));

			if let Some(key) = &cache_key
				&& let Some(response) = self.cached(key, &config).await?
			{
				return Ok(response);
			}

			let failure = match self.execute(&config).await {
				Ok(response) => return self.complete(response, cache_key).await,
				Err(failure) => failure,
			};
			let trigger = failure.error.clone();
			// Error interceptors see the typed failure, not the retry wrapper around it.
			let (context, attempts) = failure.into_context(config);

			match self.inner.interceptors.run_error_interceptors(context).await {
				ErrorOutcome::Recover(response) => return Ok(to_api_response(response)),
				ErrorOutcome::Retry if recoveries < self.inner.max_recovery_retries => {
					recoveries += 1;

					tracing::debug!(recoveries, "error interceptor requested a re-run");
				},
				ErrorOutcome::Retry => return Err(trigger),
				ErrorOutcome::Propagate(error) => match attempts {
					Some(attempts) => return Err(Error::retry_exhausted(attempts, error)),
					None => return Err(error),
				},
			}
		}
	}

	/// Drop cached GET responses whose path starts with `prefix`.
	pub async fn invalidate(&self, prefix: &str) -> Result<usize> {
		match &self.inner.cache {
			Some(cache) =>
				cache.invalidate_by_prefix(&format!("{}:{prefix}", Method::GET.as_str())).await,
			None => Ok(0),
		}
	}

	async fn cached(&self, key: &str, config: &RequestConfig) -> Result<Option<ApiResponse>> {
		let Some(cache) = &self.inner.cache else {
			return Ok(None);
		};
		let Some(hit) = cache.get(key).await? else {
			return Ok(None);
		};

		if hit.is_stale {
			let client = self.clone();
			let config = config.clone();

			cache.revalidate(key, SetOptions::default(), move || async move {
				client.fetch_data(&config).await
			});
		}

		tracing::debug!(key, stale = hit.is_stale, "serving cached response");

		Ok(Some(ApiResponse { data: hit.data, status: StatusCode::OK, headers: HeaderMap::new() }))
	}

	async fn fetch_data(&self, config: &RequestConfig) -> Result<Value> {
		let response = self.execute(config).await.map_err(|failure| failure.error)?;
		let response = self.inner.interceptors.run_response_interceptors(&response).await?;

		Ok(response.data)
	}

	async fn complete(
		&self,
		response: InterceptorResponse,
		cache_key: Option<String>,
	) -> Result<ApiResponse> {
		let response = self.inner.interceptors.run_response_interceptors(&response).await?;

		if let (Some(cache), Some(key)) = (&self.inner.cache, cache_key) {
			cache.set(key, response.data.clone(), SetOptions::default()).await?;
		}

		Ok(to_api_response(response))
	}

	async fn execute(
		&self,
		config: &RequestConfig,
	) -> std::result::Result<InterceptorResponse, Failure> {
		let request = self.transport_request(config).map_err(Failure::from)?;
		let partial = Mutex::new(None);
		let signal = config.signal.as_ref();
		let outcome = match &self.inner.retry {
			Some(handler) => handler
				.execute_with(
					|| self.attempt(&request, &partial, signal),
					RetryOverrides { signal: config.signal.clone(), ..Default::default() },
				)
				.await
				.map(|result| result.data),
			None => self.attempt(&request, &partial, signal).await,
		};

		match outcome {
			Ok(response) => Ok(interceptor_response(response, config)),
			Err(error) => Err(Failure {
				error,
				response: partial.lock().take().map(|response| interceptor_response(response, config)),
			}),
		}
	}

	async fn attempt(
		&self,
		request: &TransportRequest,
		partial: &Mutex<Option<TransportResponse>>,
		signal: Option<&CancellationToken>,
	) -> Result<TransportResponse> {
		match signal {
			Some(signal) => with_cancellation(signal, self.send_once(request, partial)).await,
			None => self.send_once(request, partial).await,
		}
	}

	async fn send_once(
		&self,
		request: &TransportRequest,
		partial: &Mutex<Option<TransportResponse>>,
	) -> Result<TransportResponse> {
		let timeout = request.timeout.unwrap_or(self.inner.timeout);

		*partial.lock() = None;

		let response = with_timeout(timeout, self.inner.transport.send(request.clone())).await?;

		if response.status.is_success() {
			return Ok(response);
		}

		let error = Error::from_status(response.status, &response.headers, response.body.as_ref());

		tracing::debug!(status = %response.status, url = %request.url, error = %error, "request failed");

		*partial.lock() = Some(response);

		Err(error)
	}

	fn transport_request(&self, config: &RequestConfig) -> Result<TransportRequest> {
		let mut url = self.resolve_url(&config.url)?;

		if !config.params.is_empty() {
			let mut pairs = url.query_pairs_mut();

			for (name, value) in &config.params {
				match value {
					Value::Null => {},
					Value::Array(items) =>
						for item in items {
							pairs.append_pair(name, &query_value(item));
						},
					other => {
						pairs.append_pair(name, &query_value(other));
					},
				}
			}
		}

		Ok(TransportRequest {
			method: config.method.clone(),
			url,
			headers: config.headers.clone(),
			body: config.body.clone(),
			timeout: config.timeout,
		})
	}

	fn resolve_url(&self, path: &str) -> Result<Url> {
		match Url::parse(path) {
			Ok(url) => Ok(url),
			Err(url::ParseError::RelativeUrlWithoutBase) => match &self.inner.base_url {
				Some(base) => Ok(base.join(path.trim_start_matches('/'))?),
				None => Err(Error::custom(
					format!("Relative URL `{path}` requires a base URL."),
					400,
					"INVALID_URL",
				)),
			},
			Err(e) => Err(e.into()),
		}
	}
}
impl Debug for ApiClient {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ApiClient")
			.field("base_url", &self.inner.base_url)
			.field("timeout", &self.inner.timeout)
			.field("transport", &self.inner.transport)
			.field("cache", &self.inner.cache)
			.field("retry", &self.inner.retry)
			.field("interceptors", &self.inner.interceptors)
			.finish()
	}
}

struct ClientInner {
	base_url: Option<Url>,
	default_headers: HeaderMap,
	timeout: Duration,
	max_recovery_retries: u32,
	transport: Arc<dyn Transport>,
	cache: Option<Cache<Value>>,
	retry: Option<RetryHandler>,
	interceptors: InterceptorManager,
}

struct Failure {
	error: Error,
	response: Option<InterceptorResponse>,
}
impl Failure {
	// Splits off the retry wrapper, returning its attempt count for re-wrapping.
	fn into_context(self, request: RequestConfig) -> (ErrorContext, Option<u32>) {
		let (error, attempts) = match self.error {
			Error::RetryExhausted { attempts, last_error } => (*last_error, Some(attempts)),
			error => (error, None),
		};

		(ErrorContext { error, request, response: self.response }, attempts)
	}
}
impl From<Error> for Failure {
	fn from(error: Error) -> Self {
		Self { error, response: None }
	}
}

fn parse_base_url(raw: &str) -> Result<Url> {
	let mut url = Url::parse(raw)?;

	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());

		url.set_path(&path);
	}

	Ok(url)
}

fn response_cache_key(config: &RequestConfig) -> String {
	generate_cache_key(
		&CacheKeyParts::new(config.method.as_str(), config.url.as_str())
			.params(Value::Object(config.params.clone())),
	)
}

fn query_value(value: &Value) -> String {
	match value {
		Value::String(value) => value.clone(),
		other => other.to_string(),
	}
}

fn interceptor_response(response: TransportResponse, config: &RequestConfig) -> InterceptorResponse {
	InterceptorResponse {
		data: response.body.unwrap_or(Value::Null),
		status: response.status,
		headers: response.headers,
		config: config.clone(),
		metadata: config.metadata.clone(),
	}
}
