use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::IgnoredAny;
use tracing::{debug, info, warn};

use super::claims::{self, TokenInfo};
use super::monitor::TokenMonitor;
use super::refresh::Refresher;
use super::storage::{self, TokenStorage};
use super::store::TokenStore;
use super::warning::{SessionHooks, SessionTimeoutWarning, WarningPrompt};
use crate::api::{
    build_http_client, ApiClient, ApiError, HttpRefreshTransport, Navigator, RequestConfig,
    RequestOptions,
};
use crate::config::Config;
use crate::models::UserProfile;

/// One signed-in client: token store, refresher, monitor and API client
/// wired together against a single backend.
#[derive(Clone)]
pub struct Session {
    store: TokenStore,
    refresher: Refresher,
    monitor: TokenMonitor,
    api: ApiClient,
    logout_path: String,
    profile_path: String,
}

impl Session {
    /// Build a session using the storage backend named in `config`
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> anyhow::Result<Self> {
        let storage = storage::from_config(config)?;
        Ok(Self::new(config, storage, navigator)?)
    }

    pub fn new(
        config: &Config,
        storage: Box<dyn TokenStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let client = build_http_client(config)?;
        let store = TokenStore::open(storage);
        let transport = Arc::new(HttpRefreshTransport::new(client.clone(), config));
        let refresher = Refresher::new(store.clone(), transport);
        let monitor = TokenMonitor::new(refresher.clone());
        let api = ApiClient::new(client, config, refresher.clone(), navigator);

        Ok(Self {
            store,
            refresher,
            monitor,
            api,
            logout_path: config.logout_path.clone(),
            profile_path: config.profile_path.clone(),
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    pub fn monitor(&self) -> &TokenMonitor {
        &self.monitor
    }

    /// Install a token issued by login, registration or OTP verification
    pub fn establish(&self, token: String, remember_me: bool) {
        info!("Session established");
        self.store.set_token_remembered(token, remember_me);
    }

    /// Holding a token that has not yet expired
    pub fn is_authenticated(&self) -> bool {
        self.store
            .get_token()
            .map(|t| !claims::is_expired(&t))
            .unwrap_or(false)
    }

    pub fn token_info(&self) -> Option<TokenInfo> {
        self.store.get_token().map(|t| claims::token_info(&t))
    }

    /// User id from the token's subject claim
    pub fn current_user_id(&self) -> Option<i64> {
        claims::decode(&self.store.get_token()?)?.user_id()
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.api.get(&self.profile_path).await
    }

    /// Tell the backend (best effort), stop monitoring, drop the token
    pub async fn logout(&self) {
        if self.store.has_token() {
            let result: Result<IgnoredAny, ApiError> = self
                .api
                .execute(&self.logout_path, &RequestOptions::post(), RequestConfig::no_refresh())
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Backend logout failed");
            }
        }
        self.monitor.stop();
        self.refresher.end_session();
    }

    /// Timeout warning controller bound to this session
    pub fn timeout_warning(&self, prompt: Arc<dyn WarningPrompt>) -> SessionTimeoutWarning {
        SessionTimeoutWarning::new(
            self.monitor.clone(),
            self.refresher.clone(),
            prompt,
            Arc::new(self.clone()),
        )
    }
}

impl SessionHooks for Session {
    fn refresh_user(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        async move {
            let user = self.current_user().await?;
            debug!(user_id = user.id, "User profile reloaded");
            Ok(())
        }
        .boxed()
    }

    fn end_session(&self) -> BoxFuture<'_, ()> {
        self.logout().boxed()
    }
}
