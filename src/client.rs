//! API client built on the transport, cache, retry, and interceptor layers.

pub mod api;
pub mod transport;

pub use api::{ApiClient, ApiClientBuilder, ApiClientConfig};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
