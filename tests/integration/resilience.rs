//! Retries, recovery-driven re-runs, timeouts, cancellation, and background revalidation.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use parking_lot::Mutex;
use serde_json::json;
use storefront_api_core::{
	ApiClient, Cache, CacheConfig, Error, ErrorKind, JitterStrategy, RequestOptions, Result,
	RetryConfig,
	interceptor::common::{bearer_auth, retry_on_error},
};
use tokio_util::sync::CancellationToken;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{header, method, path},
};

fn fast_retries(max_retries: u32) -> RetryConfig {
	RetryConfig {
		max_retries,
		initial_delay: Duration::from_millis(10),
		max_delay: Duration::from_millis(40),
		jitter: JitterStrategy::None,
		retry_on_status: vec![502, 503, 504],
		retry_on_error: vec![ErrorKind::Network, ErrorKind::Timeout],
		..Default::default()
	}
}

#[tokio::test]
async fn retries_service_unavailable_until_success() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/inventory"))
		.respond_with(ResponseTemplate::new(503).set_body_json(json!({ "message": "warming up" })))
		.up_to_n_times(2)
		.expect(2)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/inventory"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "inStock": 12 })))
		.expect(1)
		.mount(&server)
		.await;

	let attempts = Arc::new(Mutex::new(Vec::new()));
	let observed = attempts.clone();
	let client = ApiClient::builder()
		.base_url(server.uri())
		.retry(
			fast_retries(3)
				.with_on_retry(move |error, attempt, _| observed.lock().push((attempt, error.status_code()))),
		)
		.build()?;
	let response = client.get("/inventory", Default::default()).await?;

	assert_eq!(response.data, json!({ "inStock": 12 }));
	assert_eq!(*attempts.lock(), vec![(1, 503), (2, 503)]);

	Ok(())
}

#[tokio::test]
async fn exhausted_retries_report_the_last_failure() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/inventory"))
		.respond_with(ResponseTemplate::new(503))
		.expect(3)
		.mount(&server)
		.await;

	let client = ApiClient::builder().base_url(server.uri()).retry(fast_retries(2)).build()?;
	let error = client.get("/inventory", Default::default()).await.expect_err("always down");

	assert!(matches!(error, Error::RetryExhausted { attempts: 3, .. }));
	assert_eq!(error.root().status_code(), 503);
	assert_eq!(error.to_json().name, "RetryExhaustedError");

	Ok(())
}

#[tokio::test]
async fn expired_credentials_are_refreshed_and_the_request_rerun() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/me"))
		.and(header("authorization", "Bearer expired"))
		.respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "token expired" })))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/me"))
		.and(header("authorization", "Bearer fresh"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Ada" })))
		.expect(1)
		.mount(&server)
		.await;

	let token = Arc::new(Mutex::new(String::from("expired")));
	let client = ApiClient::builder().base_url(server.uri()).build()?;

	client.interceptors().use_request(bearer_auth({
		let token = token.clone();

		move || {
			let current = token.lock().clone();

			async move { Some(current) }
		}
	}));
	client.interceptors().use_error(retry_on_error(
		|error| error.kind() == ErrorKind::Authentication,
		{
			let token = token.clone();

			move |_| {
				*token.lock() = "fresh".into();

				async { Ok::<_, Error>(()) }
			}
		},
	));

	let response = client.get("/me", Default::default()).await?;

	assert_eq!(response.data["name"], "Ada");

	Ok(())
}

#[tokio::test]
async fn slow_responses_time_out() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/slow"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
		.mount(&server)
		.await;

	let client = ApiClient::builder().base_url(server.uri()).build()?;
	let error = client
		.get("/slow", RequestOptions::default().timeout(Duration::from_millis(50)))
		.await
		.expect_err("timed out");

	assert_eq!(error.kind(), ErrorKind::Timeout);
	assert_eq!(error.status_code(), 408);

	Ok(())
}

#[tokio::test]
async fn cancelled_requests_abort() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/slow"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
		.mount(&server)
		.await;

	let client = ApiClient::builder().base_url(server.uri()).build()?;
	let signal = CancellationToken::new();
	let canceller = signal.clone();

	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(50)).await;
		canceller.cancel();
	});

	let error = client
		.get("/slow", RequestOptions::default().signal(signal))
		.await
		.expect_err("cancelled");

	assert_eq!(error.kind(), ErrorKind::Aborted);
	assert_eq!(error.code(), "ABORTED");

	Ok(())
}

#[tokio::test]
async fn stale_entries_are_served_while_revalidating() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/banner"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "v": 1 })))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/banner"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "v": 2 })))
		.mount(&server)
		.await;

	let cache = Cache::new(CacheConfig {
		ttl: Duration::from_secs(30),
		stale_time: Some(Duration::from_millis(50)),
		..Default::default()
	})?;
	let client = ApiClient::builder().base_url(server.uri()).cache(cache.clone()).build()?;

	assert_eq!(client.get("/banner", Default::default()).await?.data, json!({ "v": 1 }));

	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(client.get("/banner", Default::default()).await?.data, json!({ "v": 1 }));

	let mut refreshed = None;

	for _ in 0..50 {
		tokio::time::sleep(Duration::from_millis(20)).await;

		let current = client.get("/banner", Default::default()).await?.data;

		if current == json!({ "v": 2 }) {
			refreshed = Some(current);

			break;
		}
	}

	assert_eq!(refreshed, Some(json!({ "v": 2 })));
	assert!(cache.metrics().stale_hits >= 1);

	Ok(())
}
