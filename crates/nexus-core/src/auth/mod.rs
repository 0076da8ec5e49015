//! Bearer-token session lifecycle.
//!
//! This module provides:
//! - `TokenStore`: the single current access token, mirrored to durable storage
//! - `claims`: unverified reads of the token's expiry
//! - `TokenMonitor`: warning and refresh timers armed ahead of expiry
//! - `Refresher`: single-flight token refresh
//! - `SessionTimeoutWarning`: the extend/logout prompt contract
//! - `Session`: all of the above wired to one backend
//!
//! Warnings fire 5 minutes before expiry and refreshes 1 minute before.

pub mod claims;
pub mod monitor;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod store;
pub mod warning;

pub use claims::{Claims, TokenInfo};
pub use monitor::{TokenMonitor, REFRESH_LEAD_SECS, WARNING_LEAD_SECS};
pub use refresh::{RefreshError, RefreshTransport, Refresher, TokenEvent};
pub use session::Session;
pub use storage::{FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, TokenStorage};
pub use store::TokenStore;
pub use warning::{SessionHooks, SessionTimeoutWarning, WarningPrompt};
