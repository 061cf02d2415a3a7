use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const JSON_CONTENT_TYPE: &str = "application/json";
/// Login endpoint, relative to the API base URL.
pub const LOGIN_ENDPOINT: &str = "/auth/login";
/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE_NAME: &str = "session_key";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionDefaults;

impl SessionDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    /// Per-call timeout for [`Session::request`]. Never applied to the live
    /// message stream, whose reads block until data or connection error.
    pub request_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: SessionDefaults::CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

/// Session cookie value and its client-side expiry.
#[derive(Clone, Debug)]
pub struct SessionToken {
    value: SecretString,
    expires_at: Option<SystemTime>,
}

impl SessionToken {
    pub fn new(value: SecretString, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// A token is only valid strictly before its expiry instant.
    ///
    /// A token without an expiry never expires here. Servers that omit the
    /// attribute would otherwise force a login before every call, which is
    /// what a zero-valued expiry check does.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    fn cookie_header(&self) -> String {
        format!("{SESSION_COOKIE_NAME}={}", self.value.expose_secret())
    }
}

#[derive(Debug, Default)]
struct AuthState {
    authenticated: bool,
    token: Option<SessionToken>,
    user_id: Option<u64>,
}

impl AuthState {
    /// Only an authenticated session holding an expired token is refreshed.
    /// A login that returned no session cookie leaves `token` empty and is
    /// never refreshed on expiry; its requests go out without a cookie.
    fn needs_refresh(&self, now: SystemTime) -> bool {
        self.authenticated
            && self
                .token
                .as_ref()
                .is_some_and(|token| token.is_expired_at(now))
    }
}

/// Authenticated client for the Tracim API.
///
/// Cloning is cheap and clones share the same authentication state, so a
/// re-login performed through one clone is observed by all of them.
#[derive(Clone)]
pub struct Session {
    http: Client,
    base_url: Arc<str>,
    request_timeout: Option<Duration>,
    credentials: Arc<RwLock<Option<Credentials>>>,
    state: Arc<Mutex<AuthState>>,
}

impl Session {
    /// Creates an unauthenticated session for an API root such as
    /// `https://tracim.example.com/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        Self::with_options(base_url, None, SessionOptions::default())
    }

    pub fn with_credentials(
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, SessionError> {
        Self::with_options(base_url, Some(credentials), SessionOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let base_url = normalize_base_url(base_url.into());
        Url::parse(&base_url).map_err(|err| SessionError::InvalidUrl {
            url: base_url.clone(),
            reason: err.to_string(),
        })?;

        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(SessionError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            request_timeout: options.request_timeout,
            credentials: Arc::new(RwLock::new(credentials)),
            state: Arc::new(Mutex::new(AuthState::default())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replaces the stored credentials. Takes effect on the next login.
    pub fn set_credentials(&self, credentials: Credentials) -> &Self {
        match self.credentials.write() {
            Ok(mut guard) => *guard = Some(credentials),
            Err(poisoned) => *poisoned.into_inner() = Some(credentials),
        }
        self
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.authenticated
    }

    /// User id returned by the last successful login.
    pub async fn user_id(&self) -> Option<u64> {
        self.state.lock().await.user_id
    }

    pub async fn token_expires_at(&self) -> Option<SystemTime> {
        self.state
            .lock()
            .await
            .token
            .as_ref()
            .and_then(SessionToken::expires_at)
    }

    pub async fn has_session_token(&self) -> bool {
        self.state.lock().await.token.is_some()
    }

    /// Logs in with the stored credentials and installs the new session token.
    ///
    /// Safe to call repeatedly; every call performs a fresh login.
    pub async fn authenticate(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.authenticate_locked(&mut state).await
    }

    /// Re-authenticates when the session is logged in and its token has
    /// expired. A failed re-login is reported as [`SessionError::Auth`].
    pub async fn ensure_fresh(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.needs_refresh(SystemTime::now()) {
            debug!(event = "session_token_expired", user_id = state.user_id);
            self.authenticate_locked(&mut state)
                .await
                .map_err(SessionError::into_auth)?;
        }
        Ok(())
    }

    /// Performs an authenticated call and returns the buffered response.
    ///
    /// Any non-2xx status is returned as [`SessionError::Request`].
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&[u8]>,
    ) -> Result<ApiResponse, SessionError> {
        self.ensure_fresh().await?;

        let mut builder = self
            .generate_request(method, endpoint, body)
            .await
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(SessionError::Transport)?;
        let status = response.status();
        let cookies = collect_cookies(&response, SystemTime::now());
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(SessionError::Transport)?;

        if !status.is_success() {
            return Err(SessionError::Request {
                status,
                body: summarize_error_body(&body),
            });
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
            cookies,
        })
    }

    /// Serializes `body` as JSON and performs [`Session::request`].
    pub async fn request_json<T>(
        &self,
        method: Method,
        endpoint: &str,
        body: &T,
    ) -> Result<ApiResponse, SessionError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(SessionError::Encode)?;
        self.request(method, endpoint, Some(&payload)).await
    }

    /// Builds a request without sending it. The session cookie is attached
    /// only while the session is authenticated.
    pub async fn generate_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&[u8]>,
    ) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(endpoint));
        if let Some(body) = body {
            builder = builder.body(body.to_vec());
        }

        let state = self.state.lock().await;
        if state.authenticated {
            if let Some(token) = state.token.as_ref() {
                builder = builder.header(COOKIE, token.cookie_header());
            }
        }
        builder
    }

    async fn authenticate_locked(&self, state: &mut AuthState) -> Result<(), SessionError> {
        state.authenticated = false;

        let payload = self
            .credentials_snapshot()
            .ok_or_else(|| SessionError::Auth {
                status: None,
                message: "no credentials configured".to_string(),
            })?
            .login_payload()
            .map_err(SessionError::Encode)?;

        let response = self
            .http
            .post(self.url(LOGIN_ENDPOINT))
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(SessionError::Transport)?;
        let status = response.status();
        let cookies = collect_cookies(&response, SystemTime::now());
        let body = response.bytes().await.map_err(SessionError::Transport)?;

        if !status.is_success() {
            return Err(SessionError::Auth {
                status: Some(status),
                message: format!("http status {status}: {}", summarize_error_body(&body)),
            });
        }

        let login: LoginResponse = serde_json::from_slice(&body)
            .map_err(|err| SessionError::Decode(format!("login response: {err}")))?;

        let token = cookies
            .into_iter()
            .find(|cookie| cookie.name == SESSION_COOKIE_NAME)
            .map(|cookie| SessionToken::new(SecretString::new(cookie.value), cookie.expires_at));
        if token.is_none() {
            warn!(
                event = "session_cookie_missing",
                cookie = SESSION_COOKIE_NAME,
                user_id = login.user_id
            );
        }

        state.token = token;
        state.user_id = Some(login.user_id);
        state.authenticated = true;
        info!(event = "session_authenticated", user_id = login.user_id);
        Ok(())
    }

    fn credentials_snapshot(&self) -> Option<Credentials> {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Buffered response of an authenticated call.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cookies: Vec<ResponseCookie>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|err| SessionError::Decode(err.to_string()))
    }

    pub fn cookie(&self, name: &str) -> Option<&ResponseCookie> {
        self.cookies.iter().find(|cookie| cookie.name == name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Owned copy of a `Set-Cookie` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    /// Absolute expiry from `Expires`, else `Max-Age` counted from receipt.
    pub expires_at: Option<SystemTime>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Login was rejected or a token refresh failed.
    #[error("authentication failed: {message}")]
    Auth {
        status: Option<StatusCode>,
        message: String,
    },

    #[error("http status {status}: {body}")]
    Request { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid base url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl SessionError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Auth { status, .. } => *status,
            Self::Request { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::Encode(_) | Self::Decode(_) | Self::InvalidUrl { .. } => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// The server answered an authenticated call with a non-2xx status.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    pub fn is_invalid_url(&self) -> bool {
        matches!(self, Self::InvalidUrl { .. })
    }

    /// Re-labels any failure raised while logging in as an auth failure.
    pub(crate) fn into_auth(self) -> Self {
        match self {
            Self::Auth { .. } => self,
            other => Self::Auth {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user_id: u64,
}

fn collect_cookies(response: &reqwest::Response, received_at: SystemTime) -> Vec<ResponseCookie> {
    response
        .cookies()
        .map(|cookie| ResponseCookie {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            expires_at: cookie_expiry(cookie.expires(), cookie.max_age(), received_at),
        })
        .collect()
}

fn cookie_expiry(
    expires: Option<SystemTime>,
    max_age: Option<Duration>,
    received_at: SystemTime,
) -> Option<SystemTime> {
    expires.or_else(|| max_age.and_then(|max_age| received_at.checked_add(max_age)))
}

fn normalize_base_url(base_url: String) -> String {
    base_url.trim_end().trim_end_matches('/').to_string()
}

pub(crate) fn summarize_error_body(body: &[u8]) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error).or(parsed.reason) {
            return message;
        }
    }

    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect()
}
