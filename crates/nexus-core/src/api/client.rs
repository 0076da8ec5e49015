//! Authenticated request execution against the dashboard API.
//!
//! Every domain client (CRM, HR, finance, ...) sends its requests through
//! [`ApiClient::execute`], which attaches the current bearer token and, on a
//! 401, refreshes the token and retries the request once before ending the
//! session.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::refresh::{RefreshTransport, Refresher};
use crate::auth::store::TokenStore;
use crate::config::{Config, RefreshCredential};
use crate::models::TokenResponse;

/// Per-call behaviour of [`ApiClient::execute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    /// Refresh and retry once on a 401. Must be off for the auth endpoints
    /// themselves (login, refresh, logout) so a 401 there cannot recurse.
    pub handle_401: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { handle_401: true }
    }
}

impl RequestConfig {
    /// Surface a 401 as-is, without attempting a refresh
    pub fn no_refresh() -> Self {
        Self { handle_401: false }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Everything needed to (re)build one request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Add a header; caller headers override the JSON defaults
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self {
        self.body = RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

/// The hard navigation performed when a session cannot be recovered.
pub trait Navigator: Send + Sync {
    /// Route currently shown, if the front end has one
    fn current_path(&self) -> Option<String> {
        None
    }

    fn navigate(&self, path: &str);
}

/// Navigator for headless use: records the redirect in the log
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, path: &str) {
        warn!(path, "Session ended, redirecting to login");
    }
}

/// Build the shared HTTP client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub fn build_http_client(config: &Config) -> Result<Client, ApiError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("nexus/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    login_path: String,
    store: TokenStore,
    refresher: Refresher,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(client: Client, config: &Config, refresher: Refresher, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            store: refresher.store().clone(),
            refresher,
            navigator,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Execute one logical API call.
    ///
    /// A 401 (with `handle_401`) triggers one refresh and one retry with the
    /// new token. If either fails the session is ended: the store is cleared,
    /// the navigator is sent to the login route, and
    /// [`ApiError::SessionExpired`] is returned.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        config: RequestConfig,
    ) -> Result<T, ApiError> {
        let token = self.store.get_token();
        let response = self.send(endpoint, options, token.as_deref()).await?;
        let status = response.status();

        if status.is_success() {
            return Self::parse_body(response, endpoint).await;
        }

        if status == StatusCode::UNAUTHORIZED && config.handle_401 {
            debug!(endpoint, "401 received, attempting token refresh");
            return self.recover_unauthorized(endpoint, options).await;
        }

        let body = response.text().await.unwrap_or_default();
        debug!(
            endpoint,
            status = status.as_u16(),
            body = %ApiError::truncate_body(&body),
            "Request failed"
        );
        Err(ApiError::from_status(status, &body))
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.execute(endpoint, &RequestOptions::get(), RequestConfig::default())
            .await
    }

    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T, ApiError> {
        self.execute(endpoint, &RequestOptions::post().json(body), RequestConfig::default())
            .await
    }

    pub async fn put<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T, ApiError> {
        self.execute(endpoint, &RequestOptions::put().json(body), RequestConfig::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.execute(endpoint, &RequestOptions::delete(), RequestConfig::default())
            .await
    }

    async fn recover_unauthorized<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        match self.refresher.refresh().await {
            Ok(token) => match self.send(endpoint, options, Some(&token)).await {
                Ok(retry) if retry.status().is_success() => {
                    debug!(endpoint, "Retry after refresh succeeded");
                    return Self::parse_body(retry, endpoint).await;
                }
                Ok(retry) => {
                    warn!(endpoint, status = retry.status().as_u16(), "Retry after refresh failed");
                }
                Err(e) => warn!(endpoint, error = %e, "Retry after refresh failed"),
            },
            Err(e) => warn!(endpoint, error = %e, "Could not refresh session"),
        }

        self.end_session();
        Err(ApiError::SessionExpired)
    }

    /// Clear the token, stand down any monitor and leave for the login
    /// route, unless already there
    fn end_session(&self) {
        self.refresher.end_session();
        let on_login = self
            .navigator
            .current_path()
            .is_some_and(|path| path.contains(self.login_path.as_str()));
        if !on_login {
            self.navigator.navigate(&self.login_path);
        }
    }

    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut headers = HeaderMap::new();
        let content_type = match options.body {
            RequestBody::Form(_) => "application/x-www-form-urlencoded",
            _ => "application/json",
        };
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.extend(options.headers.clone());
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Configuration("access token is not a valid header value".into()))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut request = self
            .client
            .request(options.method.clone(), &url)
            .headers(headers);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.body(value.to_string()),
            RequestBody::Form(fields) => request.form(fields),
        };

        request
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Request failed to send");
                ApiError::from(e)
            })
    }

    /// Parse a success body as JSON; an empty body reads as `{}`
    async fn parse_body<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        let value = if text.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("{endpoint}: {e}")))?
        };
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(format!("{endpoint}: {e}")))
    }
}

/// The refresh endpoint over HTTP
pub struct HttpRefreshTransport {
    client: Client,
    url: String,
    credential: RefreshCredential,
}

impl HttpRefreshTransport {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: config.url(&config.refresh_path),
            credential: config.refresh_credential,
        }
    }
}

impl RefreshTransport for HttpRefreshTransport {
    fn refresh(&self, current: Option<String>) -> BoxFuture<'_, Result<TokenResponse, ApiError>> {
        async move {
            let mut request = self
                .client
                .post(&self.url)
                .header(header::CONTENT_TYPE, "application/json");
            if let (RefreshCredential::Bearer, Some(token)) = (self.credential, current.as_deref()) {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }

            let text = response.text().await?;
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {e}")))
        }
        .boxed()
    }
}
