//! Codelab HTTP client
//!
//! Typed access to the platform's REST API. Requests are described by
//! replayable [`client::RequestSpec`] values so that a caller can reissue a
//! request after refreshing its credential.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod types;

pub use client::error::ClientError;
pub use client::request::{MultipartField, MultipartValue, Payload, RequestSpec};
pub use client::{ApiClient, ApiClientBuilder};
