//! Request pipeline behaviour: auth injection, caching, typed failures, and recovery.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use storefront_api_core::{
	ApiClient, Cache, CacheConfig, ErrorKind, ErrorOutcome, RequestOptions, Result, has_error_code,
	interceptor::{
		ErrorContext, InterceptorResponse,
		common::{LogPhase, LogRecord, log_error, log_request, log_response, timing, unwrap_data},
	},
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_json, header, method, path, query_param},
};

#[derive(Debug, Deserialize, PartialEq)]
struct Product {
	id: u32,
	name: String,
}

fn base_url(server: &MockServer) -> String {
	format!("{}/api", server.uri())
}

#[tokio::test]
async fn authenticated_gets_are_cached_until_invalidated() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/api/products"))
		.and(query_param("page", "1"))
		.and(header("authorization", "Bearer storefront-token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1, "name": "Lamp" }])))
		.expect(3)
		.mount(&server)
		.await;

	let cache = Cache::new(CacheConfig { ttl: Duration::from_secs(60), ..Default::default() })?;
	let client = ApiClient::builder()
		.base_url(base_url(&server))
		.auth_token("storefront-token")
		.cache(cache.clone())
		.build()?;
	let options = || RequestOptions::default().param("page", 1);
	let first = client.get("/products", options()).await?.json::<Vec<Product>>()?;
	let second = client.get("/products", options()).await?.json::<Vec<Product>>()?;

	assert_eq!(first.data, vec![Product { id: 1, name: "Lamp".into() }]);
	assert_eq!(first.status, StatusCode::OK);
	assert_eq!(second.data, first.data);
	assert_eq!(cache.stats().await?.fresh_count, 1);
	assert_eq!(client.invalidate("/products").await?, 1);

	client.get("/products", options()).await?;
	client.get("/products", options().skip_cache()).await?;

	Ok(())
}

#[tokio::test]
async fn writes_send_json_bodies_and_are_never_cached() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/api/cart/items"))
		.and(header("content-type", "application/json"))
		.and(body_json(json!({ "productId": 7, "quantity": 2 })))
		.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "cartSize": 2 })))
		.expect(2)
		.mount(&server)
		.await;

	let cache = Cache::new(CacheConfig::default())?;
	let client = ApiClient::builder().base_url(base_url(&server)).cache(cache.clone()).build()?;
	let body = json!({ "productId": 7, "quantity": 2 });

	for _ in 0..2 {
		let response = client.post("/cart/items", body.clone(), RequestOptions::default()).await?;

		assert_eq!(response.status, StatusCode::CREATED);
		assert_eq!(response.data["cartSize"], 2);
	}

	assert_eq!(cache.stats().await?.size, 0);

	Ok(())
}

#[tokio::test]
async fn failure_statuses_surface_typed_errors() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/api/products/404"))
		.respond_with(
			ResponseTemplate::new(404)
				.set_body_json(json!({ "resource": "Product", "identifier": "404" })),
		)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/api/checkout"))
		.respond_with(ResponseTemplate::new(400).set_body_json(json!({
			"message": "Checkout rejected",
			"errors": [{ "field": "email", "message": "is required", "code": "REQUIRED" }]
		})))
		.mount(&server)
		.await;

	let client = ApiClient::builder().base_url(base_url(&server)).build()?;
	let not_found =
		client.get("/products/404", RequestOptions::default()).await.expect_err("missing product");

	assert_eq!(not_found.kind(), ErrorKind::NotFound);
	assert!(has_error_code(&not_found, "NOT_FOUND"));
	assert_eq!(not_found.to_json().name, "NotFoundError");
	assert_eq!(not_found.to_json().message, "Product with identifier '404' not found");

	let invalid = client
		.post("/checkout", json!({}), RequestOptions::default())
		.await
		.expect_err("validation failure");

	assert_eq!(invalid.kind(), ErrorKind::Validation);
	assert_eq!(invalid.status_code(), 400);
	assert_eq!(
		invalid.to_json().details,
		Some(json!({
			"errors": [{ "field": "email", "message": "is required", "code": "REQUIRED" }]
		}))
	);

	Ok(())
}

#[tokio::test]
async fn error_interceptors_can_recover_with_fallback_data() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/api/recommendations"))
		.respond_with(ResponseTemplate::new(502).set_body_json(json!({ "message": "upstream down" })))
		.mount(&server)
		.await;

	let client = ApiClient::builder().base_url(base_url(&server)).build()?;

	client.interceptors().use_error(|context: ErrorContext| async move {
		if context.error.status_code() >= 500 {
			ErrorOutcome::Recover(InterceptorResponse {
				data: json!({ "items": [] }),
				status: StatusCode::OK,
				headers: Default::default(),
				config: context.request,
				metadata: Default::default(),
			})
		} else {
			ErrorOutcome::Propagate(context.error)
		}
	});

	let response = client.get("/recommendations", RequestOptions::default()).await?;

	assert_eq!(response.data, json!({ "items": [] }));
	assert_eq!(response.status, StatusCode::OK);

	Ok(())
}

#[tokio::test]
async fn response_and_logging_interceptors_compose() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/api/products/1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(json!({ "data": { "result": { "id": 1, "name": "Lamp" } } })),
		)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/api/products/2"))
		.respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "forbidden" })))
		.mount(&server)
		.await;

	let records = Arc::new(Mutex::new(Vec::<LogRecord>::new()));
	let sink = {
		let records = records.clone();

		move |record: &LogRecord| records.lock().push(record.clone())
	};
	let client = ApiClient::builder().base_url(base_url(&server)).build()?;

	client.interceptors().use_request(timing());
	client.interceptors().use_request(log_request().with_sink(sink.clone()));
	client.interceptors().use_response(unwrap_data("data.result"));
	client.interceptors().use_response(log_response().with_sink(sink.clone()));
	client.interceptors().use_error(log_error().with_sink(sink));

	let product = client.get("/products/1", RequestOptions::default()).await?.json::<Product>()?;

	assert_eq!(product.data, Product { id: 1, name: "Lamp".into() });

	let denied = client.get("/products/2", RequestOptions::default()).await.expect_err("denied");

	assert_eq!(denied.kind(), ErrorKind::Authorization);

	let records = records.lock();

	assert_eq!(
		records.iter().map(|record| record.phase).collect::<Vec<_>>(),
		vec![LogPhase::Request, LogPhase::Response, LogPhase::Request, LogPhase::Error]
	);
	assert!(records[1].duration.is_some());
	assert_eq!(records[3].status, Some(403));
	assert_eq!(records[3].error.as_deref(), Some("forbidden"));

	Ok(())
}
