//! Values threaded through interceptor chains.

// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{ACCEPT, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Free-form key/value bag shared between interceptors of one request.
pub type Metadata = Map<String, Value>;

const APPLICATION_JSON: &str = "application/json";

/// Request description handed to request interceptors and the transport.
///
/// Interceptors receive an owned copy; the caller's value is never mutated by a chain run.
#[derive(Clone, Debug)]
pub struct RequestConfig {
	/// Absolute URL, or a path resolved against the client's base URL.
	pub url: String,
	/// HTTP method.
	pub method: Method,
	/// Request headers.
	pub headers: HeaderMap,
	/// Query parameters appended to the URL.
	pub params: Map<String, Value>,
	/// JSON body.
	pub body: Option<Value>,
	/// Per-request timeout.
	pub timeout: Option<Duration>,
	/// Cancellation signal.
	pub signal: Option<CancellationToken>,
	/// Interceptor scratch space.
	pub metadata: Metadata,
}
impl RequestConfig {
	/// Build a bare request without default headers.
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			method,
			headers: HeaderMap::new(),
			params: Map::new(),
			body: None,
			timeout: None,
			signal: None,
			metadata: Metadata::new(),
		}
	}
}

/// Caller-facing request options for [`to_request_config`] and the client verbs.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
	/// Headers layered over the defaults.
	pub headers: HeaderMap,
	/// Query parameters.
	pub params: Map<String, Value>,
	/// JSON body.
	pub body: Option<Value>,
	/// Per-request timeout.
	pub timeout: Option<Duration>,
	/// Cancellation signal.
	pub signal: Option<CancellationToken>,
	/// Initial interceptor metadata.
	pub metadata: Metadata,
	/// Bypass the response cache for this request.
	pub skip_cache: bool,
}
impl RequestOptions {
	/// Add or replace a header.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Add a query parameter.
	pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.params.insert(name.into(), value.into());

		self
	}

	/// Attach a JSON body.
	pub fn body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Bound the request by `timeout`.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Attach a cancellation signal.
	pub fn signal(mut self, signal: CancellationToken) -> Self {
		self.signal = Some(signal);

		self
	}

	/// Bypass the response cache.
	pub fn skip_cache(mut self) -> Self {
		self.skip_cache = true;

		self
	}
}

/// Response handed to response interceptors.
#[derive(Clone, Debug)]
pub struct InterceptorResponse {
	/// Decoded payload; `Value::Null` for empty bodies.
	pub data: Value,
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Request that produced this response.
	pub config: RequestConfig,
	/// Interceptor scratch space.
	pub metadata: Metadata,
}

/// Failure handed to error interceptors.
#[derive(Clone, Debug)]
pub struct ErrorContext {
	/// Current error; replaced by each propagating interceptor.
	pub error: Error,
	/// Request that failed.
	pub request: RequestConfig,
	/// Partial response, when the server answered with a failure status.
	pub response: Option<InterceptorResponse>,
}

/// Decision returned by an error interceptor.
#[derive(Clone, Debug)]
pub enum ErrorOutcome {
	/// Stop the chain; this response becomes the result.
	Recover(InterceptorResponse),
	/// Stop the chain and ask the caller to re-issue the request.
	Retry,
	/// Continue with the next interceptor, which sees this error.
	Propagate(Error),
}

/// Minimal public response shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse<T = Value> {
	/// Payload.
	pub data: T,
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
}
impl ApiResponse<Value> {
	/// Deserialize the payload into `T`.
	pub fn json<T>(self) -> Result<ApiResponse<T>>
	where
		T: DeserializeOwned,
	{
		Ok(ApiResponse {
			data: serde_json::from_value(self.data)?,
			status: self.status,
			headers: self.headers,
		})
	}
}

/// Build a [`RequestConfig`] with JSON `Content-Type`/`Accept` defaults under caller overrides.
pub fn to_request_config(
	method: Method,
	url: impl Into<String>,
	options: RequestOptions,
) -> RequestConfig {
	let mut headers = HeaderMap::new();

	headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
	headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
	headers.extend(options.headers);

	RequestConfig {
		url: url.into(),
		method,
		headers,
		params: options.params,
		body: options.body,
		timeout: options.timeout,
		signal: options.signal,
		metadata: options.metadata,
	}
}

/// Project an interceptor response down to `{data, status, headers}`.
pub fn to_api_response(response: InterceptorResponse) -> ApiResponse {
	ApiResponse { data: response.data, status: response.status, headers: response.headers }
}
