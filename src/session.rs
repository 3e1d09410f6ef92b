use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::Error;
use crate::store::{CredentialStore, TokenKind};
use crate::token;
use crate::traits::{PermissionParser, UserExtenderDyn};
use crate::types::{PermissionSet, User};

/// In-memory view of the session.
///
/// `permissions_resolved == false` means "still loading", not "no
/// permissions". Whether the session is authenticated is deliberately not
/// part of the snapshot: see [`SessionState::is_authenticated`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub permissions: PermissionSet,
    pub permissions_resolved: bool,
}

/// `true` while the stored access token is decodable and unexpired.
pub(crate) fn is_authenticated(store: &CredentialStore, clock: &dyn Clock) -> bool {
    !token::is_expired_at(&store.get(TokenKind::Access), clock.now_ms())
}

/// Authoritative session snapshot plus the transition that rebuilds it from
/// a token pair.
///
/// Concurrent `set_user` calls are not serialized: each one commits its
/// result when it finishes, so the last to finish wins.
pub struct SessionState {
    snapshot: RwLock<SessionSnapshot>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    extender: Box<dyn UserExtenderDyn>,
    parser: Box<dyn PermissionParser>,
}

impl SessionState {
    pub(crate) fn new(
        store: CredentialStore,
        clock: Arc<dyn Clock>,
        extender: Box<dyn UserExtenderDyn>,
        parser: Box<dyn PermissionParser>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(SessionSnapshot::default()),
            store,
            clock,
            extender,
            parser,
        }
    }

    /// Rebuilds the session from a token pair. Empty strings mean "absent".
    ///
    /// 1. A non-empty `refresh_token` is persisted.
    /// 2. A non-empty `access_token` is persisted, decoded, and passed
    ///    through the user extender.
    /// 3. If the resulting user has an expiry, it replaces the current user
    ///    and its permissions are recomputed.
    /// 4. `permissions_resolved` is set, whatever happened above.
    ///
    /// Never fails: errors are logged and leave the previous user in place.
    pub async fn set_user(&self, access_token: &str, refresh_token: &str) {
        if let Err(e) = self.resolve(access_token, refresh_token).await {
            tracing::warn!(error = %e, "Session user not updated");
        }
        self.snapshot.write().permissions_resolved = true;
    }

    async fn resolve(&self, access_token: &str, refresh_token: &str) -> Result<(), Error> {
        self.store.set(TokenKind::Refresh, refresh_token);

        if access_token.is_empty() {
            return Ok(());
        }
        self.store.set(TokenKind::Access, access_token);

        let claims = match token::decode(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(error = %e, "Access token not decodable; user left unchanged");
                return Ok(());
            }
        };

        let user = self
            .extender
            .extend_dyn(User::new(access_token, claims))
            .await
            .map_err(|e| Error::Extend(e.to_string()))?;

        if !user.has_expiry() {
            tracing::debug!("Extended user has no expiry; user left unchanged");
            return Ok(());
        }

        let permissions = self.permissions_for(&user);
        let mut snapshot = self.snapshot.write();
        snapshot.user = Some(user);
        snapshot.permissions = permissions;
        Ok(())
    }

    fn permissions_for(&self, user: &User) -> PermissionSet {
        match self.parser.parse(user) {
            Some(permissions) => permissions.into_iter().collect(),
            None => {
                if !self.parser.is_default() {
                    tracing::warn!(
                        sub = %user.claims.sub,
                        "Permission parser returned no list; check the configured parser"
                    );
                }
                PermissionSet::new()
            }
        }
    }

    /// Evaluated against the persisted access token on every call, so it
    /// flips to `false` the moment the token expires, timer or not.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        is_authenticated(&self.store, self.clock.as_ref())
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.snapshot.read().user.clone()
    }

    #[must_use]
    pub fn permissions(&self) -> PermissionSet {
        self.snapshot.read().permissions.clone()
    }

    #[must_use]
    pub fn permissions_resolved(&self) -> bool {
        self.snapshot.read().permissions_resolved
    }

    /// Runs `f` against the snapshot without cloning it.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&SessionSnapshot) -> R) -> R {
        f(&self.snapshot.read())
    }
}
