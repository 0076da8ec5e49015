//! Proactive expiry scheduling for the held access token.
//!
//! While monitoring, two timers are armed against the current token's expiry:
//! a warning [`WARNING_LEAD_SECS`] before it and a refresh
//! [`REFRESH_LEAD_SECS`] before it. A listener on the [`Refresher`] re-arms
//! both whenever any caller installs a fresh token, so no timer is ever left
//! counting down to an expiry that no longer applies. A failed refresh or an
//! ended session, from whichever caller, reports expiry and goes idle.
//!
//! Spawned tasks hold only a weak reference to the monitor; dropping the last
//! [`TokenMonitor`] handle cancels everything it armed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::claims;
use super::refresh::{Refresher, TokenEvent};

/// Seconds before expiry at which the warning callback fires
pub const WARNING_LEAD_SECS: u64 = 300;

/// Seconds before expiry at which the token is refreshed
pub const REFRESH_LEAD_SECS: u64 = 60;

type WarningCallback = Arc<dyn Fn(u64) + Send + Sync>;
type ExpiredCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct Callbacks {
    on_warning: WarningCallback,
    on_expired: ExpiredCallback,
}

/// Pending work of one `start`. Dropping a handle without aborting it
/// detaches the task.
struct MonitorSchedule {
    generation: u64,
    callbacks: Callbacks,
    warning: Option<JoinHandle<()>>,
    refresh: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl MonitorSchedule {
    fn cancel_timers(&mut self) {
        for handle in [self.warning.take(), self.refresh.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_timers();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[derive(Default)]
struct MonitorState {
    generation: u64,
    schedule: Option<MonitorSchedule>,
}

/// What arming against the current token decided
enum Plan {
    NoToken,
    Expired,
    Armed {
        warning: JoinHandle<()>,
        refresh: JoinHandle<()>,
    },
}

#[derive(Clone)]
pub struct TokenMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    refresher: Refresher,
    state: Mutex<MonitorState>,
}

impl TokenMonitor {
    pub fn new(refresher: Refresher) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                refresher,
                state: Mutex::new(MonitorState::default()),
            }),
        }
    }

    /// Begin monitoring the store's current token, replacing any schedule
    /// already active.
    ///
    /// With no token this does nothing. An already-expired token invokes
    /// `on_expired` before returning and arms nothing. Must be called from
    /// within a Tokio runtime.
    pub fn start<W, E>(&self, on_warning: W, on_expired: E)
    where
        W: Fn(u64) + Send + Sync + 'static,
        E: Fn() + Send + Sync + 'static,
    {
        self.stop();

        let callbacks = Callbacks {
            on_warning: Arc::new(on_warning),
            on_expired: Arc::new(on_expired),
        };
        let generation = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.generation
        };
        // Subscribe before arming so a refresh completing immediately is seen.
        let events = self.inner.refresher.subscribe();

        match self.inner.arm(generation, &callbacks) {
            Plan::NoToken => debug!("No token to monitor"),
            Plan::Expired => {
                info!("Token already expired");
                (callbacks.on_expired)();
            }
            Plan::Armed { warning, refresh } => {
                let listener = self.inner.spawn_listener(generation, events);
                let mut state = self.inner.lock();
                if state.generation == generation {
                    state.schedule = Some(MonitorSchedule {
                        generation,
                        callbacks,
                        warning: Some(warning),
                        refresh: Some(refresh),
                        listener: Some(listener),
                    });
                } else {
                    // A concurrent start() won the race
                    warning.abort();
                    refresh.abort();
                    listener.abort();
                }
            }
        }
    }

    /// Cancel pending timers. A refresh already in flight runs to completion
    /// but no longer fires callbacks.
    pub fn stop(&self) {
        let schedule = self.inner.lock().schedule.take();
        if let Some(mut schedule) = schedule {
            schedule.cancel_all();
            debug!(generation = schedule.generation, "Token monitor stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.lock().schedule.is_some()
    }
}

impl MonitorInner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm warning and refresh timers against the current token's expiry
    fn arm(self: &Arc<Self>, generation: u64, callbacks: &Callbacks) -> Plan {
        let Some(token) = self.refresher.store().get_token() else {
            return Plan::NoToken;
        };
        let expires_in = claims::seconds_until_expiry(&token);
        if expires_in == 0 {
            return Plan::Expired;
        }

        let warning_in = Duration::from_secs(expires_in.saturating_sub(WARNING_LEAD_SECS));
        let refresh_in = Duration::from_secs(expires_in.saturating_sub(REFRESH_LEAD_SECS));
        debug!(
            expires_in,
            warning_in = warning_in.as_secs(),
            refresh_in = refresh_in.as_secs(),
            "Arming token monitor"
        );

        let warning = {
            let inner = Arc::downgrade(self);
            let on_warning = Arc::clone(&callbacks.on_warning);
            tokio::spawn(async move {
                tokio::time::sleep(warning_in).await;
                let Some(inner) = inner.upgrade() else { return };
                // The token may have been replaced since arming
                if let Some(current) = inner.refresher.store().get_token() {
                    on_warning(claims::seconds_until_expiry(&current));
                }
            })
        };

        let refresh = {
            let inner = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep(refresh_in).await;
                let Some(inner) = inner.upgrade() else { return };
                inner.detach_refresh(generation);
                if !inner.refresher.store().has_token() {
                    inner.expire(generation, "no token held at refresh time");
                    return;
                }
                if let Err(e) = inner.refresher.refresh().await {
                    inner.expire(generation, &e.to_string());
                }
                // On success the listener re-arms.
            })
        };

        Plan::Armed { warning, refresh }
    }

    fn spawn_listener(
        self: &Arc<Self>,
        generation: u64,
        mut events: watch::Receiver<TokenEvent>,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            while events.changed().await.is_ok() {
                let event = *events.borrow_and_update();
                let Some(inner) = Weak::upgrade(&inner) else { break };
                let keep_listening = match event {
                    TokenEvent::Refreshed => inner.rearm(generation),
                    TokenEvent::RefreshFailed | TokenEvent::SessionEnded => {
                        inner.stand_down(generation, event);
                        false
                    }
                    TokenEvent::Unchanged => true,
                };
                if !keep_listening {
                    break;
                }
            }
        })
    }

    /// Take the refresh timer out of the schedule so `stop()` cannot abort a
    /// refresh that has already begun.
    fn detach_refresh(&self, generation: u64) {
        let mut state = self.lock();
        if let Some(schedule) = state.schedule.as_mut().filter(|s| s.generation == generation) {
            schedule.refresh.take();
        }
    }

    /// Replace the timers of schedule `generation` after a token change.
    /// Returns false once that schedule is gone.
    fn rearm(self: &Arc<Self>, generation: u64) -> bool {
        let callbacks = {
            let mut state = self.lock();
            match state.schedule.as_mut().filter(|s| s.generation == generation) {
                Some(schedule) => {
                    schedule.cancel_timers();
                    schedule.callbacks.clone()
                }
                None => return false,
            }
        };
        debug!(generation, "Token refreshed, rescheduling monitor");

        match self.arm(generation, &callbacks) {
            Plan::Armed { warning, refresh } => {
                let mut state = self.lock();
                match state.schedule.as_mut().filter(|s| s.generation == generation) {
                    Some(schedule) => {
                        schedule.warning = Some(warning);
                        schedule.refresh = Some(refresh);
                        true
                    }
                    None => {
                        warning.abort();
                        refresh.abort();
                        false
                    }
                }
            }
            plan => {
                // Called from the listener itself, so its handle is dropped, not aborted.
                let schedule = self.take_schedule(generation);
                if schedule.is_some() && matches!(plan, Plan::Expired) {
                    info!("Token expired while monitoring");
                    (callbacks.on_expired)();
                }
                false
            }
        }
    }

    /// The monitor's own refresh could not renew the token: go idle and
    /// report expiry
    fn expire(&self, generation: u64, reason: &str) {
        let Some(mut schedule) = self.take_schedule(generation) else {
            debug!(generation, "Ignoring refresh failure for a replaced schedule");
            return;
        };
        if let Some(listener) = schedule.listener.take() {
            listener.abort();
        }
        warn!(reason, "Scheduled token refresh failed, session expired");
        (schedule.callbacks.on_expired)();
    }

    /// Another caller's refresh failed or the session was ended elsewhere.
    /// Runs on the listener, so its own handle is dropped, not aborted.
    fn stand_down(&self, generation: u64, event: TokenEvent) {
        if let Some(schedule) = self.take_schedule(generation) {
            info!(?event, "Session ended while monitoring");
            (schedule.callbacks.on_expired)();
        }
    }

    fn take_schedule(&self, generation: u64) -> Option<MonitorSchedule> {
        let mut state = self.lock();
        if state.schedule.as_ref().map(|s| s.generation) != Some(generation) {
            return None;
        }
        let mut schedule = state.schedule.take()?;
        schedule.cancel_timers();
        Some(schedule)
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut schedule) = state.schedule.take() {
            schedule.cancel_all();
        }
    }
}
