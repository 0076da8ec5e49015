//! The "session expiring soon" prompt and its two actions.
//!
//! The front end supplies a [`WarningPrompt`] (a modal, a terminal line, ...)
//! and the [`SessionHooks`] that re-fetch the user or end the session. The
//! prompt shows the remaining seconds as of the moment the warning fired; it
//! is not re-ticked against the clock.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::monitor::TokenMonitor;
use super::refresh::{RefreshError, Refresher};
use crate::api::ApiError;

pub trait WarningPrompt: Send + Sync {
    /// Show the prompt with a snapshot of the seconds left
    fn open(&self, remaining_secs: u64);
    fn close(&self);
}

/// Session-level collaborators the prompt's actions call into
pub trait SessionHooks: Send + Sync {
    /// Re-fetch the signed-in user's profile after the session was extended
    fn refresh_user(&self) -> BoxFuture<'_, Result<(), ApiError>>;

    /// Log out: notify the backend best-effort and clear the token
    fn end_session(&self) -> BoxFuture<'_, ()>;
}

/// Owns the monitor schedule it activates; dropping it stops monitoring.
pub struct SessionTimeoutWarning {
    monitor: TokenMonitor,
    refresher: Refresher,
    prompt: Arc<dyn WarningPrompt>,
    hooks: Arc<dyn SessionHooks>,
}

impl SessionTimeoutWarning {
    pub fn new(
        monitor: TokenMonitor,
        refresher: Refresher,
        prompt: Arc<dyn WarningPrompt>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        Self {
            monitor,
            refresher,
            prompt,
            hooks,
        }
    }

    /// Start watching the current token
    pub fn activate(&self) {
        let prompt = Arc::clone(&self.prompt);
        let on_warning = move |remaining: u64| {
            info!(remaining, "Session expiring soon");
            prompt.open(remaining);
        };

        let prompt = Arc::clone(&self.prompt);
        let hooks = Arc::clone(&self.hooks);
        let on_expired = move || {
            prompt.close();
            let hooks = Arc::clone(&hooks);
            tokio::spawn(async move { hooks.end_session().await });
        };

        self.monitor.start(on_warning, on_expired);
    }

    pub fn deactivate(&self) {
        self.monitor.stop();
    }

    /// "Extend": refresh now. On success the user is re-fetched and the
    /// prompt closes; on failure the session ends.
    pub async fn extend(&self) -> Result<(), RefreshError> {
        match self.refresher.refresh().await {
            Ok(_) => {
                if let Err(e) = self.hooks.refresh_user().await {
                    warn!(error = %e, "Failed to reload user after extending session");
                }
                self.prompt.close();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to extend session");
                self.monitor.stop();
                self.prompt.close();
                self.hooks.end_session().await;
                Err(e)
            }
        }
    }

    /// "Logout": close the prompt and end the session
    pub async fn logout(&self) {
        self.prompt.close();
        self.hooks.end_session().await;
    }
}

impl Drop for SessionTimeoutWarning {
    fn drop(&mut self) {
        self.monitor.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::auth::claims::test_support::token_expiring_in;
    use crate::auth::refresh::test_support::ScriptedTransport;
    use crate::auth::storage::MemoryTokenStorage;
    use crate::auth::store::TokenStore;

    #[derive(Default)]
    struct RecordingPrompt {
        opened: Mutex<Vec<u64>>,
        closed: AtomicUsize,
    }

    impl WarningPrompt for RecordingPrompt {
        fn open(&self, remaining_secs: u64) {
            self.opened.lock().unwrap().push(remaining_secs);
        }
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeHooks {
        store: TokenStore,
        user_reloads: AtomicUsize,
        sessions_ended: AtomicUsize,
    }

    impl SessionHooks for FakeHooks {
        fn refresh_user(&self) -> BoxFuture<'_, Result<(), ApiError>> {
            async move {
                self.user_reloads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }

        fn end_session(&self) -> BoxFuture<'_, ()> {
            async move {
                self.sessions_ended.fetch_add(1, Ordering::SeqCst);
                self.store.clear();
            }
            .boxed()
        }
    }

    struct Fixture {
        warning: SessionTimeoutWarning,
        monitor: TokenMonitor,
        store: TokenStore,
        prompt: Arc<RecordingPrompt>,
        hooks: Arc<FakeHooks>,
        transport: Arc<ScriptedTransport>,
    }

    fn fixture(token: String, outcomes: Vec<Result<String, u16>>) -> Fixture {
        let store = TokenStore::open(Box::new(MemoryTokenStorage::with_token(token)));
        let transport = ScriptedTransport::new(outcomes);
        let refresher = Refresher::new(store.clone(), transport.clone());
        let monitor = TokenMonitor::new(refresher.clone());
        let prompt = Arc::new(RecordingPrompt::default());
        let hooks = Arc::new(FakeHooks {
            store: store.clone(),
            user_reloads: AtomicUsize::new(0),
            sessions_ended: AtomicUsize::new(0),
        });
        let warning = SessionTimeoutWarning::new(monitor.clone(), refresher, prompt.clone(), hooks.clone());
        Fixture {
            warning,
            monitor,
            store,
            prompt,
            hooks,
            transport,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_opens_prompt_with_snapshot() {
        let f = fixture(token_expiring_in(120), vec![]);
        f.warning.activate();
        settle().await;

        let opened = f.prompt.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 1);
        assert!((118..=120).contains(&opened[0]));
        assert!(f.monitor.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_success_reloads_user_and_closes() {
        let f = fixture(token_expiring_in(120), vec![Ok(token_expiring_in(3600))]);
        f.warning.activate();
        settle().await;

        f.warning.extend().await.unwrap();
        settle().await;

        assert_eq!(f.hooks.user_reloads.load(Ordering::SeqCst), 1);
        assert_eq!(f.prompt.closed.load(Ordering::SeqCst), 1);
        assert_eq!(f.hooks.sessions_ended.load(Ordering::SeqCst), 0);
        assert!(f.monitor.is_monitoring());
        assert!(f.store.has_token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_failure_ends_session() {
        let f = fixture(token_expiring_in(120), vec![Err(401)]);
        f.warning.activate();
        settle().await;

        assert!(f.warning.extend().await.is_err());
        settle().await;
        assert_eq!(f.hooks.sessions_ended.load(Ordering::SeqCst), 1);
        assert_eq!(f.prompt.closed.load(Ordering::SeqCst), 1);
        assert!(!f.monitor.is_monitoring());
        assert_eq!(f.hooks.user_reloads.load(Ordering::SeqCst), 0);
        assert!(!f.store.has_token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_closes_and_ends_session() {
        let f = fixture(token_expiring_in(120), vec![]);
        f.warning.activate();
        settle().await;

        f.warning.logout().await;
        assert_eq!(f.prompt.closed.load(Ordering::SeqCst), 1);
        assert_eq!(f.hooks.sessions_ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_ends_session() {
        let f = fixture(token_expiring_in(-5), vec![]);
        f.warning.activate();
        settle().await;

        assert_eq!(f.prompt.closed.load(Ordering::SeqCst), 1);
        assert_eq!(f.hooks.sessions_ended.load(Ordering::SeqCst), 1);
        assert!(f.prompt.opened.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_stops_monitor() {
        let f = fixture(token_expiring_in(3600), vec![]);
        f.warning.activate();
        assert!(f.monitor.is_monitoring());
        f.warning.deactivate();
        assert!(!f.monitor.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_warning_stops_monitoring() {
        let f = fixture(token_expiring_in(120), vec![Ok(token_expiring_in(3600))]);
        f.warning.activate();
        settle().await;
        assert!(f.monitor.is_monitoring());

        let Fixture {
            warning,
            monitor,
            transport,
            hooks,
            ..
        } = f;
        drop(warning);
        assert!(!monitor.is_monitoring());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(transport.calls(), 0);
        assert_eq!(hooks.sessions_ended.load(Ordering::SeqCst), 0);
    }
}
