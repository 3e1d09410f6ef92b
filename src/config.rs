use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::scheduler::REFRESH_BUFFER;
use crate::types::StorageKey;

/// A route that stays reachable without an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousRoute {
    pub path: String,
}

impl AnonymousRoute {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Session configuration.
///
/// Every field has a default, so `SessionConfig::new()` is a complete config.
/// Override with the `with_*` methods or read the environment with
/// [`from_env()`](SessionConfig::from_env).
///
/// ```rust,ignore
/// use token_session::SessionConfig;
///
/// let config = SessionConfig::new()
///     .with_redirect_to_login(true)
///     .with_login_path("/sign-in")
///     .with_anonymous_routes(["/", "/about"]);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionConfig {
    pub(crate) access_token_key: StorageKey,
    pub(crate) refresh_token_key: StorageKey,
    pub(crate) refresh_buffer: Duration,
    pub(crate) redirect_to_login: bool,
    pub(crate) login_path: String,
    pub(crate) anonymous_routes: Vec<AnonymousRoute>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token_key: "token".into(),
            refresh_token_key: "refresh_token".into(),
            refresh_buffer: REFRESH_BUFFER,
            redirect_to_login: false,
            login_path: "/login".into(),
            anonymous_routes: Vec::new(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `AUTH_TOKEN_KEY`: storage key for the access token
    /// - `AUTH_REFRESH_TOKEN_KEY`: storage key for the refresh token
    /// - `AUTH_REFRESH_BUFFER_MS`: renew this many milliseconds before expiry
    /// - `AUTH_REDIRECT_TO_LOGIN`: `"1"` or `"true"` to install the navigation guard
    /// - `AUTH_LOGIN_PATH`: login location for redirects
    /// - `AUTH_ANONYMOUS_ROUTES`: comma-separated paths exempt from the guard
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `AUTH_REFRESH_BUFFER_MS` is not a number.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env()`](SessionConfig::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `AUTH_REFRESH_BUFFER_MS` is not a number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::new();

        if let Some(key) = lookup("AUTH_TOKEN_KEY") {
            config = config.with_access_token_key(key);
        }
        if let Some(key) = lookup("AUTH_REFRESH_TOKEN_KEY") {
            config = config.with_refresh_token_key(key);
        }
        if let Some(ms) = lookup("AUTH_REFRESH_BUFFER_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("AUTH_REFRESH_BUFFER_MS: {e}")))?;
            config = config.with_refresh_buffer(Duration::from_millis(ms));
        }
        if let Some(flag) = lookup("AUTH_REDIRECT_TO_LOGIN") {
            config = config.with_redirect_to_login(matches!(flag.as_str(), "1" | "true"));
        }
        if let Some(path) = lookup("AUTH_LOGIN_PATH") {
            config = config.with_login_path(path);
        }
        if let Some(routes) = lookup("AUTH_ANONYMOUS_ROUTES") {
            config = config.with_anonymous_routes(
                routes
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            );
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_access_token_key(mut self, key: impl Into<String>) -> Self {
        self.access_token_key = StorageKey(key.into());
        self
    }

    #[must_use]
    pub fn with_refresh_token_key(mut self, key: impl Into<String>) -> Self {
        self.refresh_token_key = StorageKey(key.into());
        self
    }

    /// Safety margin subtracted from the access token's expiry when
    /// scheduling renewal (default: 120 s).
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Install the navigation guard on `init()`.
    #[must_use]
    pub fn with_redirect_to_login(mut self, enabled: bool) -> Self {
        self.redirect_to_login = enabled;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_anonymous_routes<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.anonymous_routes = paths.into_iter().map(AnonymousRoute::new).collect();
        self
    }

    #[must_use]
    pub fn access_token_key(&self) -> &StorageKey {
        &self.access_token_key
    }

    #[must_use]
    pub fn refresh_token_key(&self) -> &StorageKey {
        &self.refresh_token_key
    }

    #[must_use]
    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    #[must_use]
    pub fn redirect_to_login(&self) -> bool {
        self.redirect_to_login
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn anonymous_routes(&self) -> &[AnonymousRoute] {
        &self.anonymous_routes
    }
}
