//! HTTP boundary: the transport seam and the conditional-fetch
//! protocol built on top of it.

mod fetch;
mod transport;

pub use fetch::ConditionalFetcher;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};

#[cfg(test)]
pub(crate) use transport::testing::FakeTransport;
