//! Access-token refresh with single-flight coalescing.
//!
//! Any number of callers (the monitor's refresh timer, a request that hit a
//! 401, the user extending their session) may ask for a refresh at the same
//! time. They all join one backend call and observe the same outcome.
//!
//! Every outcome, and the session being ended, is published as a
//! [`TokenEvent`] so monitors can re-arm or stand down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::store::TokenStore;
use crate::api::ApiError;
use crate::models::TokenResponse;

/// The backend call behind a refresh.
///
/// `current` is the token held when the flight started; implementations
/// decide whether to present it.
pub trait RefreshTransport: Send + Sync {
    fn refresh(&self, current: Option<String>) -> BoxFuture<'_, Result<TokenResponse, ApiError>>;
}

/// Why a refresh produced no token. Cloneable so every joined caller gets it.
#[derive(Debug, Clone, Error)]
#[error("Token refresh failed: {message}")]
pub struct RefreshError {
    pub status: Option<u16>,
    pub message: String,
}

impl From<&ApiError> for RefreshError {
    fn from(e: &ApiError) -> Self {
        Self {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

/// Latest change to the held token, as seen by [`Refresher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEvent {
    #[default]
    Unchanged,
    Refreshed,
    RefreshFailed,
    SessionEnded,
}

type Flight = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

#[derive(Clone)]
pub struct Refresher {
    inner: Arc<RefresherInner>,
}

struct RefresherInner {
    store: TokenStore,
    transport: Arc<dyn RefreshTransport>,
    in_flight: Mutex<Option<Flight>>,
    events: watch::Sender<TokenEvent>,
    refreshes: AtomicU64,
}

impl Refresher {
    pub fn new(store: TokenStore, transport: Arc<dyn RefreshTransport>) -> Self {
        let (events, _) = watch::channel(TokenEvent::default());
        Self {
            inner: Arc::new(RefresherInner {
                store,
                transport,
                in_flight: Mutex::new(None),
                events,
                refreshes: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Refresh the access token, joining a flight already underway.
    ///
    /// On success the new token is installed in the store before any caller
    /// resumes, and is returned.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let flight = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let flight = Self::run(Arc::clone(&self.inner)).boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Receiver that changes after every refresh outcome and session end
    pub fn subscribe(&self) -> watch::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    /// Number of successful refreshes so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::SeqCst)
    }

    /// Drop the held token and tell subscribers the session is over
    pub fn end_session(&self) {
        self.inner.store.clear();
        self.inner.events.send_replace(TokenEvent::SessionEnded);
        debug!("Session ended");
    }

    async fn run(inner: Arc<RefresherInner>) -> Result<String, RefreshError> {
        debug!("Starting token refresh");
        let current = inner.store.get_token();
        let result = inner.transport.refresh(current).await;

        // Settle the slot first so a caller that arrives after this flight
        // starts a new one instead of reusing a finished result.
        inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match result {
            Ok(response) => {
                inner.store.set_token(Some(response.access_token.clone()));
                inner.refreshes.fetch_add(1, Ordering::SeqCst);
                inner.events.send_replace(TokenEvent::Refreshed);
                info!(token_type = %response.token_type, "Access token refreshed");
                Ok(response.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                inner.events.send_replace(TokenEvent::RefreshFailed);
                Err(RefreshError::from(&e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Transport that replays scripted outcomes, optionally after a delay
    pub struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<String, u16>>>,
        delay: Duration,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedTransport {
        pub fn new(outcomes: Vec<Result<String, u16>>) -> Arc<Self> {
            Self::with_delay(outcomes, Duration::ZERO)
        }

        pub fn with_delay(outcomes: Vec<Result<String, u16>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                delay,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshTransport for ScriptedTransport {
        fn refresh(&self, current: Option<String>) -> BoxFuture<'_, Result<TokenResponse, ApiError>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen.lock().unwrap().push(current);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let next = self.outcomes.lock().unwrap().pop_front().unwrap_or(Err(500));
                match next {
                    Ok(token) => Ok(TokenResponse {
                        access_token: token,
                        token_type: "bearer".to_string(),
                    }),
                    Err(status) => Err(ApiError::Http {
                        status,
                        message: format!("HTTP error {status}"),
                    }),
                }
            }
            .boxed()
        }
    }
}
