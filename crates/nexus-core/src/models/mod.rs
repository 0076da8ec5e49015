//! Wire types for the auth endpoints this crate talks to.

pub mod user;

pub use user::{TokenResponse, UserProfile};
