use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "guard")]
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::Error;
use crate::gate::{self, Gate, PermitRules};
#[cfg(feature = "guard")]
use crate::guard::{self, Interaction, MemoryNavigator, NavigationGuard, Navigator};
use crate::scheduler::RefreshScheduler;
use crate::session::{SessionSnapshot, SessionState};
use crate::store::{CredentialStore, KeyValueStore, TokenKind};
use crate::token;
use crate::traits::{
    ClaimsPermissions, IdentityExtender, NoRefresh, PermissionParser, TokenRefresher,
    TokenRefresherDyn, UserExtender, UserExtenderDyn,
};
use crate::types::{PermissionSet, TokenPair, User};

/// Builder for [`SessionManager`].
///
/// Only the storage backend is required; every collaborator has a default
/// (no refresh capability, identity extender, `permissions` claim parser,
/// system clock, in-memory navigator at `/`).
pub struct SessionManagerBuilder {
    backend: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    refresher: Box<dyn TokenRefresherDyn>,
    extender: Box<dyn UserExtenderDyn>,
    parser: Box<dyn PermissionParser>,
    #[cfg(feature = "guard")]
    navigator: Arc<dyn Navigator>,
}

impl SessionManagerBuilder {
    fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            refresher: Box::new(NoRefresh),
            extender: Box::new(IdentityExtender),
            parser: Box::new(ClaimsPermissions),
            #[cfg(feature = "guard")]
            navigator: Arc::new(MemoryNavigator::new("/")),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_refresher(mut self, refresher: impl TokenRefresher) -> Self {
        self.refresher = Box::new(refresher);
        self
    }

    #[must_use]
    pub fn with_extender(mut self, extender: impl UserExtender) -> Self {
        self.extender = Box::new(extender);
        self
    }

    #[must_use]
    pub fn with_permission_parser(mut self, parser: impl PermissionParser) -> Self {
        self.parser = Box::new(parser);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(feature = "guard")]
    #[must_use]
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionManager {
        let store = CredentialStore::new(self.backend, &self.config);
        let state = SessionState::new(
            store.clone(),
            Arc::clone(&self.clock),
            self.extender,
            self.parser,
        );
        let scheduler = RefreshScheduler::new(self.config.refresh_buffer, Arc::clone(&self.clock));

        SessionManager {
            inner: Arc::new(Inner {
                config: self.config,
                store,
                clock: self.clock,
                state,
                scheduler,
                refresher: self.refresher,
                epoch: AtomicU64::new(0),
                #[cfg(feature = "guard")]
                navigator: self.navigator,
                #[cfg(feature = "guard")]
                guard: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    config: SessionConfig,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    state: SessionState,
    scheduler: RefreshScheduler,
    refresher: Box<dyn TokenRefresherDyn>,
    /// Bumped by every `dispose()`. Work started under an older epoch must
    /// not commit or arm anything.
    epoch: AtomicU64,
    #[cfg(feature = "guard")]
    navigator: Arc<dyn Navigator>,
    #[cfg(feature = "guard")]
    guard: Mutex<Option<NavigationGuard>>,
}

impl Inner {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Commits a new pair and schedules its renewal, unless the session was
    /// disposed since `epoch` was taken.
    ///
    /// Re-arms with the refresh token now in the store. That is the one just
    /// committed, or the previous one when the issuer does not rotate it.
    async fn apply(inner: &Arc<Self>, epoch: u64, access_token: &str, refresh_token: &str) {
        inner.state.set_user(access_token, refresh_token).await;
        if !inner.is_current(epoch) {
            tracing::debug!("Session disposed while resolving user; refresh not scheduled");
            return;
        }
        let stored_refresh = inner.store.get(TokenKind::Refresh);
        Self::arm(inner, epoch, access_token, &stored_refresh);
    }

    fn arm(inner: &Arc<Self>, epoch: u64, access_token: &str, refresh_token: &str) -> bool {
        let weak = Arc::downgrade(inner);
        inner.scheduler.arm(access_token, refresh_token, move |token| {
            refetch(weak, epoch, token)
        })
    }

    /// One refresh cycle: exchange, commit, re-arm with the new tokens.
    ///
    /// A rejected or empty exchange commits nothing and arms nothing, which
    /// ends the cycle until the next explicit login. When the refresher
    /// returns no refresh token, the stored one is reused for the next cycle.
    async fn refetch(inner: Arc<Self>, epoch: u64, refresh_token: String) {
        if !inner.is_current(epoch) {
            return;
        }
        let pair = match inner.refresher.refresh_dyn(&refresh_token).await {
            Ok(pair) => pair,
            Err(e) => {
                let e = Error::Refresh(e.to_string());
                tracing::warn!(error = %e, "Background refresh failed");
                TokenPair::default()
            }
        };

        if !inner.is_current(epoch) {
            tracing::debug!("Session disposed during refresh; result dropped");
            return;
        }
        if pair.access_token.is_empty() {
            tracing::info!("No access token from refresher; refresh cycle ended");
        } else {
            tracing::info!("Access token refreshed");
        }

        Self::apply(&inner, epoch, &pair.access_token, &pair.refresh_token).await;
    }
}

/// Timer callback. Holds only a weak reference so a dropped session is never
/// called back.
async fn refetch(inner: Weak<Inner>, epoch: u64, refresh_token: String) {
    if let Some(inner) = inner.upgrade() {
        Inner::refetch(inner, epoch, refresh_token).await;
    }
}

/// Client-side session: token persistence, proactive renewal, the current
/// user and its permissions.
///
/// Cheap to clone; clones share the same session.
///
/// ```rust,ignore
/// use token_session::{MemoryStore, SessionConfig, SessionManager, refresh_fn};
///
/// let session = SessionManager::builder(Arc::new(MemoryStore::new()))
///     .with_config(SessionConfig::from_env()?)
///     .with_refresher(refresh_fn(|refresh_token| async move {
///         api.refresh(&refresh_token).await
///     }))
///     .build();
///
/// session.init().await;
/// // after a login form succeeds:
/// session.set_user(&access_token, &refresh_token).await;
/// // on shutdown:
/// session.dispose();
/// ```
///
/// Concurrent `set_user` calls (say, a background refresh finishing while a
/// login is in flight) are not serialized: the last one to finish wins.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    #[must_use]
    pub fn builder(backend: Arc<dyn KeyValueStore>) -> SessionManagerBuilder {
        SessionManagerBuilder::new(backend)
    }

    /// Bootstraps from the credential store.
    ///
    /// - Fresh access token: resolve the user from the stored pair and arm
    ///   the refresh timer.
    /// - Expired access token but fresh refresh token: refresh right away.
    /// - Neither: resolve with nothing, so gated content leaves "loading".
    ///
    /// Installs the navigation guard when redirect-to-login is enabled.
    pub async fn init(&self) {
        let inner = &self.inner;
        let epoch = inner.epoch();

        let access = inner.store.get(TokenKind::Access);
        let refresh = inner.store.get(TokenKind::Refresh);
        let now_ms = inner.clock.now_ms();

        if !token::is_expired_at(&access, now_ms) {
            tracing::debug!("Restoring session from stored access token");
            inner.state.set_user(&access, &refresh).await;
            if inner.is_current(epoch) {
                Inner::arm(inner, epoch, &access, &refresh);
            }
        } else if !token::is_expired_at(&refresh, now_ms) {
            tracing::debug!("Stored access token unusable; refreshing");
            let weak = Arc::downgrade(inner);
            inner
                .scheduler
                .schedule_now(&refresh, move |token| refetch(weak, epoch, token));
        } else {
            tracing::debug!("No usable stored tokens");
            inner.state.set_user("", "").await;
        }

        if !inner.is_current(epoch) {
            tracing::debug!("Session disposed during init");
            return;
        }

        #[cfg(feature = "guard")]
        if inner.config.redirect_to_login {
            *inner.guard.lock() = Some(NavigationGuard::new(
                inner.store.clone(),
                Arc::clone(&inner.navigator),
                Arc::clone(&inner.clock),
                inner.config.login_path.clone(),
                inner.config.anonymous_routes.clone(),
            ));
        }
    }

    /// Cancels the pending refresh and removes the navigation guard.
    ///
    /// A refresh or `init()` already in flight runs to completion but arms
    /// nothing, and a refreshed pair that arrives afterwards is dropped, even
    /// if `init()` was called again meanwhile. Idempotent; `init()` may be
    /// called again afterwards.
    pub fn dispose(&self) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.scheduler.cancel();
        #[cfg(feature = "guard")]
        inner.guard.lock().take();
    }

    /// Commits a token pair from an external login flow and schedules its
    /// renewal. Empty strings mean "absent".
    pub async fn set_user(&self, access_token: &str, refresh_token: &str) {
        let epoch = self.inner.epoch();
        Inner::apply(&self.inner, epoch, access_token, refresh_token).await;
    }

    /// Live check of the stored access token; never cached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.is_authenticated()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.snapshot()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.user()
    }

    #[must_use]
    pub fn permissions(&self) -> PermissionSet {
        self.inner.state.permissions()
    }

    #[must_use]
    pub fn permissions_resolved(&self) -> bool {
        self.inner.state.permissions_resolved()
    }

    /// Gate outcome for `rules` against the current permissions.
    #[must_use]
    pub fn gate(&self, rules: &PermitRules) -> Gate {
        self.inner
            .state
            .with_snapshot(|s| gate::decide(&s.permissions, rules, s.permissions_resolved))
    }

    /// Whether content guarded by `rules` is visible right now.
    #[must_use]
    pub fn permit(&self, rules: &PermitRules) -> bool {
        self.gate(rules).is_granted()
    }

    /// See [`gate::has_permissions`].
    #[must_use]
    pub fn has_permissions<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.inner
            .state
            .with_snapshot(|s| gate::has_permissions(&s.permissions, required))
    }

    /// See [`gate::has_one_of_permissions`].
    #[must_use]
    pub fn has_one_of_permissions<S: AsRef<str>>(&self, candidates: &[S]) -> bool {
        self.inner
            .state
            .with_snapshot(|s| gate::has_one_of_permissions(&s.permissions, candidates))
    }

    /// Whether a refresh timer is pending.
    #[must_use]
    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Clears the tokens and navigates to the configured login path.
    #[cfg(feature = "guard")]
    pub fn redirect_to_login(&self) -> bool {
        guard::redirect_to_login(
            &self.inner.store,
            self.inner.navigator.as_ref(),
            &self.inner.config.login_path,
        )
    }

    /// Where the user was headed before being sent to login (`/` if unknown).
    #[cfg(feature = "guard")]
    #[must_use]
    pub fn page_attempt(&self) -> String {
        guard::page_attempt(&self.inner.navigator.location().search)
    }

    /// Feeds a user interaction to the navigation guard, if installed.
    /// Returns `true` when the interaction was blocked.
    #[cfg(feature = "guard")]
    pub fn handle_interaction(&self, interaction: &mut Interaction) -> bool {
        match self.inner.guard.lock().as_ref() {
            Some(guard) => guard.on_interaction(interaction),
            None => false,
        }
    }

    #[cfg(feature = "guard")]
    #[must_use]
    pub fn is_guard_installed(&self) -> bool {
        self.inner.guard.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BoxError;
    use crate::store::MemoryStore;
    use crate::token::testing::token_expiring;
    use crate::traits::{extend_fn, refresh_fn};

    const NOW_MS: i64 = 1_700_000_000_000;
    const NOW_S: i64 = NOW_MS / 1000;

    fn manager_with(backend: &Arc<MemoryStore>) -> SessionManager {
        SessionManager::builder(backend.clone())
            .with_clock(Arc::new(ManualClock::new(NOW_MS)))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn init_without_tokens_resolves_empty() {
        let manager = manager_with(&Arc::new(MemoryStore::new()));

        manager.init().await;

        assert!(manager.permissions_resolved());
        assert!(manager.user().is_none());
        assert!(!manager.is_authenticated());
        assert!(!manager.is_refresh_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn set_user_arms_refresh() {
        let manager = manager_with(&Arc::new(MemoryStore::new()));

        manager
            .set_user(&token_expiring("u", NOW_S + 600), &token_expiring("u", NOW_S + 86_400))
            .await;

        assert!(manager.is_authenticated());
        assert!(manager.is_refresh_scheduled());
        manager.dispose();
        assert!(!manager.is_refresh_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_result_dropped_after_dispose() {
        let backend = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let manager = SessionManager::builder(backend.clone())
            .with_clock(Arc::new(ManualClock::new(NOW_MS)))
            .with_refresher(refresh_fn(move |_token: String| {
                seen.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, BoxError>(TokenPair::new(
                        token_expiring("next", NOW_S + 3_600),
                        token_expiring("next", NOW_S + 86_400),
                    ))
                }
            }))
            .build();

        manager
            .set_user(&token_expiring("u", NOW_S + 60), &token_expiring("u", NOW_S + 86_400))
            .await;
        // Timer fires at once (inside the buffer); the refresher is now in flight.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        manager.dispose();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(manager.user().unwrap().claims.sub, "u");
        assert!(!manager.is_refresh_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_resolving_refreshed_user_stops_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let manager = SessionManager::builder(Arc::new(MemoryStore::new()))
            .with_clock(Arc::new(ManualClock::new(NOW_MS)))
            .with_refresher(refresh_fn(move |_token: String| {
                seen.fetch_add(1, Ordering::SeqCst);
                // Inside the buffer, so a re-arm would fire at once.
                async {
                    Ok::<_, BoxError>(TokenPair::new(
                        token_expiring("next", NOW_S + 60),
                        token_expiring("next", NOW_S + 86_400),
                    ))
                }
            }))
            .with_extender(extend_fn(|user: User| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, BoxError>(user)
            }))
            .build();

        manager
            .set_user(&token_expiring("u", NOW_S + 60), &token_expiring("u", NOW_S + 86_400))
            .await;
        // Timer fired; the refreshed pair is now inside the extender.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        manager.dispose();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(!manager.is_refresh_scheduled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_follows_snapshot() {
        let manager = manager_with(&Arc::new(MemoryStore::new()));
        let rules = PermitRules::new().has(["read"]);
        assert_eq!(manager.gate(&rules), Gate::Loading);

        let access = crate::token::testing::encode(&serde_json::json!({
            "sub": "u",
            "exp": NOW_S + 600,
            "permissions": ["read"],
        }));
        manager.set_user(&access, "").await;

        assert!(manager.permit(&rules));
        assert!(!manager.permit(&PermitRules::new().one_of(["admin"])));
        assert!(manager.has_permissions(&["read"]));
        assert!(!manager.has_one_of_permissions(&["admin", "owner"]));
    }

    #[cfg(feature = "guard")]
    #[tokio::test(start_paused = true)]
    async fn guard_installed_only_when_enabled() {
        let manager = manager_with(&Arc::new(MemoryStore::new()));
        manager.init().await;
        assert!(!manager.is_guard_installed());
        assert!(!manager.handle_interaction(&mut Interaction::new(
            guard::InteractionKind::PointerDown
        )));

        let enabled = SessionManager::builder(Arc::new(MemoryStore::new()))
            .with_config(SessionConfig::new().with_redirect_to_login(true))
            .build();
        enabled.init().await;
        assert!(enabled.is_guard_installed());
        enabled.dispose();
        assert!(!enabled.is_guard_installed());
    }
}
