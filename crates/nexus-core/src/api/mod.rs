//! REST API plumbing for the Nexus dashboard backend.
//!
//! This module provides the `ApiClient` every domain client sends its
//! requests through. It injects the bearer token held by the session and
//! transparently recovers from a 401 by refreshing the token and retrying
//! the request once.

pub mod client;
pub mod error;

pub use client::{
    build_http_client, ApiClient, HttpRefreshTransport, LogNavigator, Navigator, RequestBody,
    RequestConfig, RequestOptions,
};
pub use error::ApiError;
