//! Client-side session core for the Nexus business dashboard.
//!
//! Holds the bearer token, watches its expiry, refreshes it ahead of time,
//! and recovers from 401s on any API call with one refresh and one retry.
//! Domain clients (CRM, HR, finance, inventory, ...) build on [`api::ApiClient`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, Navigator, RequestConfig, RequestOptions};
pub use auth::{Session, TokenStore};
pub use config::Config;
