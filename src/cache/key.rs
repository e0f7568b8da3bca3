//! Deterministic cache key generation.

// crates.io
use serde_json::Value;

/// Request attributes that identify a cacheable response.
#[derive(Clone, Debug, Default)]
pub struct CacheKeyParts {
	/// HTTP method; upper-cased in the key.
	pub method: String,
	/// Request path.
	pub path: String,
	/// Query parameters.
	pub params: Option<Value>,
	/// Request body, for methods that carry one.
	pub body: Option<Value>,
	/// Additional discriminators appended in order.
	pub extra: Vec<String>,
}
impl CacheKeyParts {
	/// Start a key for `method` and `path`.
	pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
		Self { method: method.into(), path: path.into(), ..Default::default() }
	}

	/// Set the query parameters.
	pub fn params(mut self, params: Value) -> Self {
		self.params = Some(params);

		self
	}

	/// Set the request body.
	pub fn body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Append an extra discriminator such as a tenant or locale.
	pub fn extra(mut self, discriminator: impl Into<String>) -> Self {
		self.extra.push(discriminator.into());

		self
	}
}

/// Build a key of the form `{METHOD}:{path}:{sortedParamsJSON}`.
///
/// Object keys are sorted recursively before serialization, so logically identical requests map to
/// the same key regardless of field insertion order. Body JSON and extra discriminators follow,
/// joined with `:`. Absent or empty params are omitted.
pub fn generate_cache_key(parts: &CacheKeyParts) -> String {
	let mut segments = vec![parts.method.to_ascii_uppercase(), parts.path.clone()];

	if let Some(params) = parts.params.as_ref().filter(|params| !is_empty(params)) {
		segments.push(canonical_json(params));
	}
	if let Some(body) = parts.body.as_ref().filter(|body| !body.is_null()) {
		segments.push(canonical_json(body));
	}

	segments.extend(parts.extra.iter().cloned());

	segments.join(":")
}

/// Serialize `value` with object keys in lexicographic order.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();

	write_canonical(value, &mut out);

	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut entries = map.iter().collect::<Vec<_>>();

			entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
			out.push('{');

			for (i, (key, value)) in entries.into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}

				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_canonical(value, out);
			}

			out.push('}');
		},
		Value::Array(items) => {
			out.push('[');

			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}

				write_canonical(item, out);
			}

			out.push(']');
		},
		scalar => out.push_str(&scalar.to_string()),
	}
}

fn is_empty(value: &Value) -> bool {
	match value {
		Value::Null => true,
		Value::Object(map) => map.is_empty(),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn param_order_does_not_change_the_key() {
		let a = generate_cache_key(&CacheKeyParts::new("GET", "/x").params(json!({ "b": 2, "a": 1 })));
		let b = generate_cache_key(&CacheKeyParts::new("GET", "/x").params(json!({ "a": 1, "b": 2 })));

		assert_eq!(a, b);
		assert_eq!(a, r#"GET:/x:{"a":1,"b":2}"#);
	}

	#[test]
	fn nested_objects_are_sorted() {
		let key = canonical_json(&json!({ "z": { "y": [ { "d": 1, "c": 2 } ], "x": null }, "a": "s" }));

		assert_eq!(key, r#"{"a":"s","z":{"x":null,"y":[{"c":2,"d":1}]}}"#);
	}

	#[test]
	fn body_and_extra_discriminators_are_appended() {
		let key = generate_cache_key(
			&CacheKeyParts::new("post", "/search")
				.body(json!({ "q": "silk" }))
				.extra("en-GB")
				.extra("tenant-7"),
		);

		assert_eq!(key, r#"POST:/search:{"q":"silk"}:en-GB:tenant-7"#);
	}

	#[test]
	fn empty_params_are_omitted() {
		let key = generate_cache_key(&CacheKeyParts::new("GET", "/products").params(json!({})));

		assert_eq!(key, "GET:/products");
	}
}
