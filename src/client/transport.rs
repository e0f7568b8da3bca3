//! Outbound HTTP transport abstraction and its reqwest implementation.

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use serde_json::Value;
use url::Url;
// self
use crate::_prelude::*;

/// Fully resolved request handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL including query parameters.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// JSON body.
	pub body: Option<Value>,
	/// Per-attempt timeout.
	pub timeout: Option<Duration>,
}

/// Raw response produced by a [`Transport`]; non-2xx statuses are not errors at this layer.
#[derive(Clone, Debug)]
pub struct TransportResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Decoded body; non-JSON payloads are carried as a string, empty bodies as `None`.
	pub body: Option<Value>,
	/// Round-trip duration.
	pub elapsed: Duration,
}

/// Performs a single HTTP exchange.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
	/// Send `request`, failing only when no response was received.
	async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
	client: Client,
}
impl ReqwestTransport {
	/// Create a transport with a default client.
	pub fn new() -> Self {
		Self::default()
	}

	/// Reuse an existing client, keeping its connection pool and TLS settings.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}
}
#[async_trait]
impl Transport for ReqwestTransport {
	async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
		let mut builder = self.client.request(request.method.clone(), request.url.clone());

		for (name, value) in request.headers.iter() {
			builder = builder.header(name, value);
		}

		if let Some(body) = &request.body {
			builder = builder.body(serde_json::to_vec(body)?);
		}
		if let Some(timeout) = request.timeout {
			builder = builder.timeout(timeout);
		}

		let start = Instant::now();
		let response = builder.send().await.map_err(|e| transport_error(e, request.timeout))?;
		let status = response.status();
		let headers = response.headers().clone();
		let bytes = response.bytes().await.map_err(|e| transport_error(e, request.timeout))?;
		let elapsed = start.elapsed();

		tracing::debug!(
			method = %request.method,
			url = %request.url,
			status = %status,
			elapsed = ?elapsed,
			"http exchange complete"
		);

		Ok(TransportResponse { status, headers, body: decode_body(&bytes), elapsed })
	}
}

fn transport_error(error: reqwest::Error, timeout: Option<Duration>) -> Error {
	match timeout {
		Some(timeout) if error.is_timeout() => Error::timeout(timeout),
		_ => Error::from(error),
	}
}

fn decode_body(bytes: &[u8]) -> Option<Value> {
	if bytes.is_empty() {
		return None;
	}

	Some(
		serde_json::from_slice(bytes)
			.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
	)
}
