use std::future::Future;
use std::pin::Pin;

use crate::error::BoxError;
use crate::types::{TokenPair, User};

/// Consumer-provided token renewal.
///
/// Called by the refresh timer shortly before the access token expires.
/// The transport (HTTP, IPC, ...) is entirely up to the implementor.
///
/// # Example
///
/// ```rust,ignore
/// impl TokenRefresher for MyApi {
///     async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, BoxError> {
///         let res: RefreshResponse = self.http
///             .post(self.refresh_url.clone())
///             .json(&serde_json::json!({ "refresh_token": refresh_token }))
///             .send()
///             .await?
///             .json()
///             .await?;
///         Ok(TokenPair::new(res.access_token, res.refresh_token))
///     }
/// }
/// ```
pub trait TokenRefresher: Send + Sync + 'static {
    /// Exchange `refresh_token` for a new pair.
    ///
    /// An error, like an empty pair, ends the refresh cycle until the next
    /// explicit login.
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenPair, BoxError>> + Send;
}

/// Consumer-provided user enrichment, run after the claims are decoded.
///
/// A failure aborts the whole `set_user` call (the user is not replaced).
pub trait UserExtender: Send + Sync + 'static {
    fn extend(&self, user: User) -> impl Future<Output = Result<User, BoxError>> + Send;
}

/// Consumer-provided mapping from a user to its permission strings.
///
/// Returning `None` means "no permission list found" and results in an
/// empty permission set.
pub trait PermissionParser: Send + Sync + 'static {
    fn parse(&self, user: &User) -> Option<Vec<String>>;

    /// Whether this is the built-in [`ClaimsPermissions`] parser.
    ///
    /// Only custom parsers get a diagnostic when they return `None`.
    fn is_default(&self) -> bool {
        false
    }
}

/// Refresher used when none is configured: always yields an empty pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, BoxError> {
        Ok(TokenPair::default())
    }
}

/// Extender used when none is configured: returns the user unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExtender;

impl UserExtender for IdentityExtender {
    async fn extend(&self, user: User) -> Result<User, BoxError> {
        Ok(user)
    }
}

/// Default parser: reads the `permissions` claim as an array of strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsPermissions;

impl PermissionParser for ClaimsPermissions {
    fn parse(&self, user: &User) -> Option<Vec<String>> {
        user.extra("permissions")?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect()
    }

    fn is_default(&self) -> bool {
        true
    }
}

/// [`TokenRefresher`] from an async closure. See [`refresh_fn`].
#[derive(Clone)]
pub struct RefreshFn<F>(F);

/// Wraps `Fn(String) -> impl Future<Output = Result<TokenPair, BoxError>>`
/// as a [`TokenRefresher`].
pub fn refresh_fn<F, Fut>(f: F) -> RefreshFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenPair, BoxError>> + Send,
{
    RefreshFn(f)
}

impl<F, Fut> TokenRefresher for RefreshFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenPair, BoxError>> + Send,
{
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenPair, BoxError>> + Send {
        (self.0)(refresh_token.to_owned())
    }
}

/// [`UserExtender`] from an async closure. See [`extend_fn`].
#[derive(Clone)]
pub struct ExtendFn<F>(F);

pub fn extend_fn<F, Fut>(f: F) -> ExtendFn<F>
where
    F: Fn(User) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<User, BoxError>> + Send,
{
    ExtendFn(f)
}

impl<F, Fut> UserExtender for ExtendFn<F>
where
    F: Fn(User) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<User, BoxError>> + Send,
{
    fn extend(&self, user: User) -> impl Future<Output = Result<User, BoxError>> + Send {
        (self.0)(user)
    }
}

/// [`PermissionParser`] from a closure. See [`parse_fn`].
#[derive(Clone)]
pub struct ParseFn<F>(F);

pub fn parse_fn<F>(f: F) -> ParseFn<F>
where
    F: Fn(&User) -> Option<Vec<String>> + Send + Sync + 'static,
{
    ParseFn(f)
}

impl<F> PermissionParser for ParseFn<F>
where
    F: Fn(&User) -> Option<Vec<String>> + Send + Sync + 'static,
{
    fn parse(&self, user: &User) -> Option<Vec<String>> {
        (self.0)(user)
    }
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe wrapper for TokenRefresher (needed for Box<dyn>).
pub(crate) trait TokenRefresherDyn: Send + Sync {
    fn refresh_dyn<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenPair, BoxError>>;
}

impl<T: TokenRefresher> TokenRefresherDyn for T {
    fn refresh_dyn<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenPair, BoxError>> {
        Box::pin(self.refresh(refresh_token))
    }
}

/// Object-safe wrapper for UserExtender.
pub(crate) trait UserExtenderDyn: Send + Sync {
    fn extend_dyn(&self, user: User) -> BoxFuture<'_, Result<User, BoxError>>;
}

impl<T: UserExtender> UserExtenderDyn for T {
    fn extend_dyn(&self, user: User) -> BoxFuture<'_, Result<User, BoxError>> {
        Box::pin(self.extend(user))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::token::{self, testing::encode};

    fn user_with(claims: serde_json::Value) -> User {
        let token = encode(&claims);
        User::new(token.clone(), token::decode(&token).unwrap())
    }

    #[test]
    fn claims_permissions_reads_string_array() {
        let user = user_with(json!({ "exp": 10, "permissions": ["read", "write"] }));
        assert_eq!(
            ClaimsPermissions.parse(&user),
            Some(vec!["read".to_owned(), "write".to_owned()])
        );
        assert!(ClaimsPermissions.is_default());
    }

    #[test]
    fn claims_permissions_rejects_non_arrays() {
        assert_eq!(ClaimsPermissions.parse(&user_with(json!({ "exp": 10 }))), None);
        assert_eq!(
            ClaimsPermissions.parse(&user_with(json!({ "exp": 10, "permissions": "admin" }))),
            None
        );
        assert_eq!(
            ClaimsPermissions.parse(&user_with(json!({ "exp": 10, "permissions": ["a", 1] }))),
            None
        );
    }

    #[test]
    fn parse_fn_is_custom() {
        let parser = parse_fn(|user: &User| Some(vec![user.claims.sub.clone()]));
        let user = user_with(json!({ "sub": "u1", "exp": 10 }));
        assert_eq!(parser.parse(&user), Some(vec!["u1".to_owned()]));
        assert!(!parser.is_default());
    }

    #[tokio::test]
    async fn defaults_are_inert() {
        assert_eq!(NoRefresh.refresh("r").await.unwrap(), TokenPair::default());

        let user = user_with(json!({ "sub": "u1", "exp": 10 }));
        assert_eq!(IdentityExtender.extend(user.clone()).await.unwrap(), user);
    }

    #[tokio::test]
    async fn closures_through_dyn_wrappers() {
        let refresher: Box<dyn TokenRefresherDyn> = Box::new(refresh_fn(|token: String| async move {
            Ok::<_, BoxError>(TokenPair::new(format!("access-for-{token}"), "next"))
        }));
        let pair = refresher.refresh_dyn("r1").await.unwrap();
        assert_eq!(pair, TokenPair::new("access-for-r1", "next"));

        let extender: Box<dyn UserExtenderDyn> = Box::new(extend_fn(|mut user: User| async move {
            user.claims.extra.insert("plan".into(), json!("pro"));
            Ok::<_, BoxError>(user)
        }));
        let user = extender
            .extend_dyn(user_with(json!({ "sub": "u1", "exp": 10 })))
            .await
            .unwrap();
        assert_eq!(user.extra("plan"), Some(&json!("pro")));
    }
}
