//! Request, response, and error interceptor pipeline.

pub mod chain;
pub mod common;
pub mod types;

pub use chain::{
	ErrorChain, ErrorInterceptor, InterceptorChain, InterceptorHandle, InterceptorManager,
	RequestChain, RequestInterceptor, ResponseChain, ResponseInterceptor,
};
pub use types::{
	ApiResponse, ErrorContext, ErrorOutcome, InterceptorResponse, Metadata, RequestConfig,
	RequestOptions, to_api_response, to_request_config,
};
