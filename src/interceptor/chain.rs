//! Interceptor traits, ordered chains, and the three-chain manager.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
	sync::{
		Weak,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use async_trait::async_trait;
use parking_lot::RwLock;
// self
use crate::{
	_prelude::*,
	interceptor::types::{ErrorContext, ErrorOutcome, InterceptorResponse, RequestConfig},
};

/// Transforms outgoing requests.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
	/// Return the (possibly modified) request; an error aborts the pipeline.
	async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig>;
}
#[async_trait]
impl<F, Fut> RequestInterceptor for F
where
	F: Fn(RequestConfig) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<RequestConfig>> + Send + 'static,
{
	async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig> {
		(self)(config).await
	}
}

/// Transforms successful responses.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
	/// Return the (possibly modified) response; an error aborts the pipeline.
	async fn on_response(&self, response: InterceptorResponse) -> Result<InterceptorResponse>;
}
#[async_trait]
impl<F, Fut> ResponseInterceptor for F
where
	F: Fn(InterceptorResponse) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<InterceptorResponse>> + Send + 'static,
{
	async fn on_response(&self, response: InterceptorResponse) -> Result<InterceptorResponse> {
		(self)(response).await
	}
}

/// Inspects failures and may recover from them.
#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
	/// Decide how the failure described by `context` continues.
	async fn on_error(&self, context: ErrorContext) -> ErrorOutcome;
}
#[async_trait]
impl<F, Fut> ErrorInterceptor for F
where
	F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ErrorOutcome> + Send + 'static,
{
	async fn on_error(&self, context: ErrorContext) -> ErrorOutcome {
		(self)(context).await
	}
}

/// Chain of request interceptors.
pub type RequestChain = InterceptorChain<dyn RequestInterceptor>;
/// Chain of response interceptors.
pub type ResponseChain = InterceptorChain<dyn ResponseInterceptor>;
/// Chain of error interceptors.
pub type ErrorChain = InterceptorChain<dyn ErrorInterceptor>;

type Entries<I> = RwLock<Vec<ChainEntry<I>>>;

struct ChainEntry<I: ?Sized> {
	id: u64,
	interceptor: Arc<I>,
}
impl<I: ?Sized> Clone for ChainEntry<I> {
	fn clone(&self) -> Self {
		Self { id: self.id, interceptor: self.interceptor.clone() }
	}
}

/// Ordered, appendable list of interceptors addressed by id.
///
/// Removal never reorders the remaining entries.
pub struct InterceptorChain<I: ?Sized> {
	entries: Arc<Entries<I>>,
	next_id: AtomicU64,
}
impl<I: ?Sized> InterceptorChain<I> {
	/// Create an empty chain.
	pub fn new() -> Self {
		Self { entries: Arc::new(RwLock::new(Vec::new())), next_id: AtomicU64::new(1) }
	}

	/// Append `interceptor`, returning a handle that removes exactly this entry.
	pub fn use_interceptor(&self, interceptor: Arc<I>) -> InterceptorHandle<I> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		self.entries.write().push(ChainEntry { id, interceptor });

		InterceptorHandle { id, entries: Arc::downgrade(&self.entries) }
	}

	/// Remove the entry registered under `handle`.
	pub fn remove(&self, handle: &InterceptorHandle<I>) -> bool {
		remove_entry(&self.entries, handle.id)
	}

	/// Ordered snapshot of the current interceptors.
	pub fn interceptors(&self) -> Vec<Arc<I>> {
		self.entries.read().iter().map(|entry| entry.interceptor.clone()).collect()
	}

	/// Remove every interceptor.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Number of registered interceptors.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Whether the chain is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}
impl<I: ?Sized> Default for InterceptorChain<I> {
	fn default() -> Self {
		Self::new()
	}
}
impl<I: ?Sized> Debug for InterceptorChain<I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		let ids = self.entries.read().iter().map(|entry| entry.id).collect::<Vec<_>>();

		f.debug_struct("InterceptorChain").field("ids", &ids).finish()
	}
}

/// Removal handle for one chain entry.
///
/// Outliving the chain is harmless; removal then reports `false`.
pub struct InterceptorHandle<I: ?Sized> {
	id: u64,
	entries: Weak<Entries<I>>,
}
impl<I: ?Sized> InterceptorHandle<I> {
	/// Chain-unique id of the entry.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Remove the entry; returns whether it was still registered.
	pub fn remove(&self) -> bool {
		self.entries.upgrade().is_some_and(|entries| remove_entry(&entries, self.id))
	}
}
impl<I: ?Sized> Clone for InterceptorHandle<I> {
	fn clone(&self) -> Self {
		Self { id: self.id, entries: self.entries.clone() }
	}
}
impl<I: ?Sized> Debug for InterceptorHandle<I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("InterceptorHandle").field("id", &self.id).finish()
	}
}

/// Owns the request, response, and error chains and runs them.
#[derive(Debug, Default)]
pub struct InterceptorManager {
	request: RequestChain,
	response: ResponseChain,
	error: ErrorChain,
}
impl InterceptorManager {
	/// Create a manager with empty chains.
	pub fn new() -> Self {
		Self::default()
	}

	/// Request chain.
	pub fn request(&self) -> &RequestChain {
		&self.request
	}

	/// Response chain.
	pub fn response(&self) -> &ResponseChain {
		&self.response
	}

	/// Error chain.
	pub fn error(&self) -> &ErrorChain {
		&self.error
	}

	/// Append a request interceptor.
	pub fn use_request<R>(&self, interceptor: R) -> InterceptorHandle<dyn RequestInterceptor>
	where
		R: RequestInterceptor + 'static,
	{
		self.request.use_interceptor(Arc::new(interceptor))
	}

	/// Append a response interceptor.
	pub fn use_response<R>(&self, interceptor: R) -> InterceptorHandle<dyn ResponseInterceptor>
	where
		R: ResponseInterceptor + 'static,
	{
		self.response.use_interceptor(Arc::new(interceptor))
	}

	/// Append an error interceptor.
	pub fn use_error<E>(&self, interceptor: E) -> InterceptorHandle<dyn ErrorInterceptor>
	where
		E: ErrorInterceptor + 'static,
	{
		self.error.use_interceptor(Arc::new(interceptor))
	}

	/// Thread a copy of `config` through every request interceptor in order.
	pub async fn run_request_interceptors(&self, config: &RequestConfig) -> Result<RequestConfig> {
		let interceptors = self.request.interceptors();
		let mut working = config.clone();

		tracing::debug!(count = interceptors.len(), url = %config.url, "running request interceptors");

		for interceptor in interceptors {
			working = interceptor.on_request(working).await?;
		}

		Ok(working)
	}

	/// Thread a copy of `response` through every response interceptor in order.
	pub async fn run_response_interceptors(
		&self,
		response: &InterceptorResponse,
	) -> Result<InterceptorResponse> {
		let interceptors = self.response.interceptors();
		let mut working = response.clone();

		tracing::debug!(
			count = interceptors.len(),
			status = response.status.as_u16(),
			"running response interceptors"
		);

		for interceptor in interceptors {
			working = interceptor.on_response(working).await?;
		}

		Ok(working)
	}

	/// Run error interceptors until one recovers or requests a retry.
	///
	/// Each propagating interceptor replaces the error seen by the next one. When none recovers,
	/// the last propagated error is returned.
	pub async fn run_error_interceptors(&self, mut context: ErrorContext) -> ErrorOutcome {
		let interceptors = self.error.interceptors();

		tracing::debug!(count = interceptors.len(), error = %context.error, "running error interceptors");

		for interceptor in interceptors {
			match interceptor.on_error(context.clone()).await {
				ErrorOutcome::Propagate(error) => context.error = error,
				outcome => return outcome,
			}
		}

		ErrorOutcome::Propagate(context.error)
	}
}

fn remove_entry<I: ?Sized>(entries: &Entries<I>, id: u64) -> bool {
	let mut entries = entries.write();
	let before = entries.len();

	entries.retain(|entry| entry.id != id);

	entries.len() != before
}
