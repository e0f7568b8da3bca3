//! Crate-wide error taxonomy and `Result` alias.
//!
//! Every failure surfaced by the client core is an [`Error`]. The enum is closed: callers branch
//! on [`Error::kind`] or [`Error::code`] instead of inspecting message strings, and
//! [`Error::to_json`] yields the stable structured form used for logs and API error bodies.

// std
use std::error::Error as StdError;
// crates.io
use http::{HeaderMap, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
// self
use crate::_prelude::*;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Shared, cloneable handle to an underlying cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Status code reported by the base error kind when none is supplied.
pub const DEFAULT_STATUS_CODE: u16 = 500;
/// Machine-readable code reported by the base error kind when none is supplied.
pub const DEFAULT_ERROR_CODE: &str = "UNKNOWN_ERROR";

/// Discriminant of the error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// Generic failure carrying caller-defined status and code.
	Api,
	/// Transport-level failure; no HTTP status was received.
	Network,
	/// Missing or invalid credentials.
	Authentication,
	/// Credentials accepted but access denied.
	Authorization,
	/// Requested resource does not exist.
	NotFound,
	/// Request rejected with field-level errors.
	Validation,
	/// Upstream throttled the caller.
	RateLimit,
	/// Operation exceeded its time budget.
	Timeout,
	/// Retry loop ended without success.
	RetryExhausted,
	/// Operation was cancelled through its cancellation token.
	Aborted,
}
impl ErrorKind {
	/// Type name used in the serialized form.
	pub fn name(self) -> &'static str {
		match self {
			ErrorKind::Api => "ApiError",
			ErrorKind::Network => "NetworkError",
			ErrorKind::Authentication => "AuthenticationError",
			ErrorKind::Authorization => "AuthorizationError",
			ErrorKind::NotFound => "NotFoundError",
			ErrorKind::Validation => "ValidationError",
			ErrorKind::RateLimit => "RateLimitError",
			ErrorKind::Timeout => "TimeoutError",
			ErrorKind::RetryExhausted => "RetryExhaustedError",
			ErrorKind::Aborted => "AbortedError",
		}
	}

	/// Transient kinds retried by the default retry policy.
	pub fn is_transient(self) -> bool {
		matches!(self, ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit)
	}
}

/// Field-level validation failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
	/// Name of the offending field.
	pub field: String,
	/// Human-readable explanation.
	pub message: String,
	/// Optional machine-readable reason.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
}
impl FieldError {
	/// Build a field error without a reason code.
	pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self { field: field.into(), message: message.into(), code: None }
	}

	/// Attach a machine-readable reason code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}
}

/// Plain structured record produced by [`Error::to_json`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedError {
	/// Type name of the error kind.
	pub name: String,
	/// Human-readable message.
	pub message: String,
	/// HTTP-like status code.
	pub status_code: u16,
	/// Machine-readable code.
	pub code: String,
	/// Kind-specific structured payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

/// Unified error type for the API client core.
#[allow(missing_docs)]
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	Api {
		message: String,
		status_code: u16,
		code: String,
		details: Option<Value>,
		#[source]
		cause: Option<Cause>,
	},
	#[error("{message}")]
	Network {
		message: String,
		#[source]
		cause: Option<Cause>,
	},
	#[error("{message}")]
	Authentication { message: String },
	#[error("{message}")]
	Authorization { message: String },
	#[error("{}", not_found_message(.resource, .identifier.as_deref()))]
	NotFound { resource: String, identifier: Option<String> },
	#[error("{message}")]
	Validation { message: String, errors: Vec<FieldError> },
	#[error("{message}")]
	RateLimit { message: String, retry_after: Option<Duration> },
	#[error("Request timed out after {}ms", .timeout.as_millis())]
	Timeout { timeout: Duration },
	#[error("Operation failed after {attempts} attempt(s): {last_error}")]
	RetryExhausted {
		attempts: u32,
		#[source]
		last_error: Box<Error>,
	},
	#[error("{message}")]
	Aborted { message: String },
}
impl Error {
	/// Base error with the default status and code.
	pub fn new(message: impl Into<String>) -> Self {
		Self::custom(message, DEFAULT_STATUS_CODE, DEFAULT_ERROR_CODE)
	}

	/// Base error with an explicit status and code.
	pub fn custom(message: impl Into<String>, status_code: u16, code: impl Into<String>) -> Self {
		Self::Api {
			message: message.into(),
			status_code,
			code: code.into(),
			details: None,
			cause: None,
		}
	}

	/// Configuration rejected by a `validate` call.
	pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
		let reason = reason.into();

		Self::custom(format!("Invalid configuration for {field}: {reason}"), 500, "INVALID_CONFIG")
			.with_details(json!({ "field": field, "reason": reason }))
	}

	/// Transport failure wrapping its cause.
	pub fn network<E>(message: impl Into<String>, cause: E) -> Self
	where
		E: StdError + Send + Sync + 'static,
	{
		Self::Network { message: message.into(), cause: Some(Arc::new(cause)) }
	}

	/// Missing or invalid credentials.
	pub fn authentication(message: impl Into<String>) -> Self {
		Self::Authentication { message: message.into() }
	}

	/// Access denied for the authenticated principal.
	pub fn authorization(message: impl Into<String>) -> Self {
		Self::Authorization { message: message.into() }
	}

	/// Missing resource, optionally naming its identifier.
	pub fn not_found(resource: impl Into<String>, identifier: Option<String>) -> Self {
		Self::NotFound { resource: resource.into(), identifier }
	}

	/// Rejected input with ordered field errors.
	pub fn validation(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
		Self::Validation { message: message.into(), errors }
	}

	/// Throttled request with an optional server-provided wait.
	pub fn rate_limit(retry_after: Option<Duration>) -> Self {
		Self::RateLimit { message: "Rate limit exceeded".into(), retry_after }
	}

	/// Time budget exceeded.
	pub fn timeout(timeout: Duration) -> Self {
		Self::Timeout { timeout }
	}

	/// Terminal failure of a retry loop.
	pub fn retry_exhausted(attempts: u32, last_error: Error) -> Self {
		Self::RetryExhausted { attempts, last_error: Box::new(last_error) }
	}

	/// Cancelled operation.
	pub fn aborted() -> Self {
		Self::Aborted { message: "Operation was aborted".into() }
	}

	/// Attach structured details; only the base kind carries free-form details.
	pub fn with_details(mut self, value: Value) -> Self {
		if let Self::Api { details, .. } = &mut self {
			*details = Some(value);
		}

		self
	}

	/// Attach an underlying cause to the base or network kinds.
	pub fn with_cause<E>(mut self, source: E) -> Self
	where
		E: StdError + Send + Sync + 'static,
	{
		if let Self::Api { cause, .. } | Self::Network { cause, .. } = &mut self {
			*cause = Some(Arc::new(source));
		}

		self
	}

	/// Map a non-success HTTP response onto the taxonomy.
	///
	/// `body` is inspected for a `message` string and, for 400 responses, an `errors` array of
	/// field errors.
	pub fn from_status(status: StatusCode, headers: &HeaderMap, body: Option<&Value>) -> Self {
		let message = body
			.and_then(|body| body.get("message"))
			.and_then(Value::as_str)
			.map(ToOwned::to_owned)
			.unwrap_or_else(|| {
				format!(
					"Request failed with status {} {}",
					status.as_u16(),
					status.canonical_reason().unwrap_or_default()
				)
				.trim_end()
				.to_owned()
			});

		let error = match status {
			StatusCode::BAD_REQUEST => {
				let errors = body
					.and_then(|body| body.get("errors"))
					.and_then(|errors| serde_json::from_value(errors.clone()).ok())
					.unwrap_or_default();

				Self::validation(message, errors)
			},
			StatusCode::UNAUTHORIZED => Self::authentication(message),
			StatusCode::FORBIDDEN => Self::authorization(message),
			StatusCode::NOT_FOUND => {
				let resource = body
					.and_then(|body| body.get("resource"))
					.and_then(Value::as_str)
					.unwrap_or("Resource");
				let identifier = body
					.and_then(|body| body.get("identifier"))
					.and_then(Value::as_str)
					.map(ToOwned::to_owned);

				Self::not_found(resource, identifier)
			},
			StatusCode::TOO_MANY_REQUESTS =>
				Self::RateLimit { message, retry_after: parse_retry_after(headers) },
			status if status.is_server_error() =>
				Self::custom(message, status.as_u16(), "SERVER_ERROR"),
			status => Self::custom(message, status.as_u16(), "HTTP_ERROR"),
		};

		error.with_details_from_body(body)
	}

	fn with_details_from_body(self, body: Option<&Value>) -> Self {
		match (&self, body) {
			(Self::Api { details: None, .. }, Some(body)) if !body.is_null() =>
				self.with_details(body.clone()),
			_ => self,
		}
	}

	/// Discriminant of this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Api { .. } => ErrorKind::Api,
			Self::Network { .. } => ErrorKind::Network,
			Self::Authentication { .. } => ErrorKind::Authentication,
			Self::Authorization { .. } => ErrorKind::Authorization,
			Self::NotFound { .. } => ErrorKind::NotFound,
			Self::Validation { .. } => ErrorKind::Validation,
			Self::RateLimit { .. } => ErrorKind::RateLimit,
			Self::Timeout { .. } => ErrorKind::Timeout,
			Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
			Self::Aborted { .. } => ErrorKind::Aborted,
		}
	}

	/// Type name used in the serialized form.
	pub fn name(&self) -> &'static str {
		self.kind().name()
	}

	/// HTTP-like status code; `0` for transport failures.
	pub fn status_code(&self) -> u16 {
		match self {
			Self::Api { status_code, .. } => *status_code,
			Self::Network { .. } => 0,
			Self::Authentication { .. } => 401,
			Self::Authorization { .. } => 403,
			Self::NotFound { .. } => 404,
			Self::Validation { .. } => 400,
			Self::RateLimit { .. } => 429,
			Self::Timeout { .. } => 408,
			Self::RetryExhausted { .. } => DEFAULT_STATUS_CODE,
			Self::Aborted { .. } => 499,
		}
	}

	/// Machine-readable code.
	pub fn code(&self) -> &str {
		match self {
			Self::Api { code, .. } => code,
			Self::Network { .. } => "NETWORK_ERROR",
			Self::Authentication { .. } => "AUTHENTICATION_ERROR",
			Self::Authorization { .. } => "AUTHORIZATION_ERROR",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::Validation { .. } => "VALIDATION_ERROR",
			Self::RateLimit { .. } => "RATE_LIMIT_EXCEEDED",
			Self::Timeout { .. } => "TIMEOUT",
			Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
			Self::Aborted { .. } => "ABORTED",
		}
	}

	/// Kind-specific structured payload.
	pub fn details(&self) -> Option<Value> {
		match self {
			Self::Api { details, .. } => details.clone(),
			Self::Network { .. }
			| Self::Authentication { .. }
			| Self::Authorization { .. }
			| Self::Aborted { .. } => None,
			Self::NotFound { resource, identifier } => match identifier {
				Some(identifier) => Some(json!({ "resource": resource, "identifier": identifier })),
				None => Some(json!({ "resource": resource })),
			},
			Self::Validation { errors, .. } => Some(json!({ "errors": errors })),
			Self::RateLimit { retry_after, .. } =>
				retry_after.map(|after| json!({ "retryAfter": after.as_millis() as u64 })),
			Self::Timeout { timeout } => Some(json!({ "timeout": timeout.as_millis() as u64 })),
			Self::RetryExhausted { attempts, last_error } =>
				Some(json!({ "attempts": attempts, "lastError": last_error.to_json() })),
		}
	}

	/// Server-provided wait for rate-limited requests.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::RateLimit { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Innermost failure, unwrapping retry exhaustion.
	pub fn root(&self) -> &Error {
		match self {
			Self::RetryExhausted { last_error, .. } => last_error.root(),
			other => other,
		}
	}

	/// Structured form for logging and cross-boundary reporting.
	pub fn to_json(&self) -> SerializedError {
		SerializedError {
			name: self.name().into(),
			message: self.to_string(),
			status_code: self.status_code(),
			code: self.code().into(),
			details: self.details(),
		}
	}
}
impl From<reqwest::Error> for Error {
	fn from(value: reqwest::Error) -> Self {
		if value.is_timeout() {
			// reqwest does not expose the configured budget.
			return Self::Timeout { timeout: Duration::ZERO };
		}

		Self::Network { message: value.to_string(), cause: Some(Arc::new(value)) }
	}
}
impl From<serde_json::Error> for Error {
	fn from(value: serde_json::Error) -> Self {
		Self::custom(value.to_string(), DEFAULT_STATUS_CODE, "SERIALIZATION_ERROR").with_cause(value)
	}
}
impl From<url::ParseError> for Error {
	fn from(value: url::ParseError) -> Self {
		Self::custom(format!("Invalid URL: {value}."), 400, "INVALID_URL").with_cause(value)
	}
}
impl From<http::Error> for Error {
	fn from(value: http::Error) -> Self {
		Self::custom(value.to_string(), 400, "INVALID_REQUEST").with_cause(value)
	}
}
#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
	fn from(value: redis::RedisError) -> Self {
		Self::custom(value.to_string(), DEFAULT_STATUS_CODE, "CACHE_ERROR").with_cause(value)
	}
}

/// Whether an arbitrary error value belongs to this taxonomy.
pub fn is_api_error(error: &(dyn StdError + 'static)) -> bool {
	error.downcast_ref::<Error>().is_some()
}

/// Whether an arbitrary error value belongs to this taxonomy and carries `code`.
pub fn has_error_code(error: &(dyn StdError + 'static), code: &str) -> bool {
	error.downcast_ref::<Error>().is_some_and(|error| error.code() == code)
}

fn not_found_message(resource: &str, identifier: Option<&str>) -> String {
	match identifier {
		Some(identifier) => format!("{resource} with identifier '{identifier}' not found"),
		None => format!("{resource} not found"),
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(seconds) = raw.parse::<u64>() {
		return Some(Duration::from_secs(seconds));
	}

	let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);

	(at - Utc::now()).to_std().ok()
}
