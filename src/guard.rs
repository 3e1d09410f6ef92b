use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::AnonymousRoute;
use crate::session::is_authenticated;
use crate::store::CredentialStore;

/// Current location within the consuming application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Path component, e.g. `/reports`.
    pub path: String,
    /// Query string including its leading `?`, or empty.
    pub search: String,
}

impl Location {
    /// Splits `path_and_query` at the first `?`.
    #[must_use]
    pub fn parse(path_and_query: &str) -> Self {
        match path_and_query.find('?') {
            Some(idx) => Self {
                path: path_and_query[..idx].to_owned(),
                search: path_and_query[idx..].to_owned(),
            },
            None => Self {
                path: path_and_query.to_owned(),
                search: String::new(),
            },
        }
    }

    #[must_use]
    pub fn path_and_query(&self) -> String {
        format!("{}{}", self.path, self.search)
    }
}

/// Consumer-provided navigation (a router, a webview, a TUI screen stack).
pub trait Navigator: Send + Sync + 'static {
    fn location(&self) -> Location;

    /// Replaces the current location with `url` (no history entry).
    fn replace(&self, url: &str);
}

/// In-memory navigator. Records every replacement.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    current: Mutex<Location>,
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    #[must_use]
    pub fn new(path_and_query: &str) -> Self {
        Self {
            current: Mutex::new(Location::parse(path_and_query)),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn set_location(&self, path_and_query: &str) {
        *self.current.lock() = Location::parse(path_and_query);
    }

    /// Every URL passed to [`Navigator::replace`], oldest first.
    #[must_use]
    pub fn replaced(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl Navigator for MemoryNavigator {
    fn location(&self) -> Location {
        self.current.lock().clone()
    }

    fn replace(&self, url: &str) {
        self.history.lock().push(url.to_owned());
        *self.current.lock() = Location::parse(url);
    }
}

/// `<login_path>?attempt=<percent-encoded path+query>`.
#[must_use]
pub fn login_redirect_url(login_path: &str, from: &Location) -> String {
    let attempt = urlencoding::encode(&from.path_and_query()).into_owned();
    format!("{login_path}?attempt={attempt}")
}

/// Clears both tokens and sends the user to the login page, remembering
/// where they were.
///
/// Does nothing when the current path already contains `login_path`, so a
/// login page can never redirect to itself. Returns whether it redirected.
pub fn redirect_to_login(
    store: &CredentialStore,
    navigator: &dyn Navigator,
    login_path: &str,
) -> bool {
    let location = navigator.location();
    if location.path.contains(login_path) {
        return false;
    }

    store.clear_all();
    let url = login_redirect_url(login_path, &location);
    tracing::info!(from = %location.path, to = %url, "Redirecting to login");
    navigator.replace(&url);
    true
}

/// The `attempt` query parameter of `url`, or `/` when absent.
///
/// Accepts a full URL, a path with query, or a bare `?query`. `+` decodes
/// as a space.
#[must_use]
pub fn page_attempt(url: &str) -> String {
    let Some((_, query)) = url.split_once('?') else {
        return "/".to_owned();
    };
    let query = query.split_once('#').map_or(query, |(q, _)| q);

    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "attempt")
        .map_or_else(|| "/".to_owned(), |(_, value)| value.into_owned())
}

/// Kind of user interaction seen by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    PointerDown,
    KeyDown,
}

/// A user interaction in flight. The guard may stop its propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    kind: InteractionKind,
    propagation_stopped: bool,
}

impl Interaction {
    #[must_use]
    pub fn new(kind: InteractionKind) -> Self {
        Self {
            kind,
            propagation_stopped: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Forces a login redirect when an unauthenticated user interacts with a
/// route outside the allow-list.
pub struct NavigationGuard {
    store: CredentialStore,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    login_path: String,
    anonymous_routes: Vec<AnonymousRoute>,
}

impl fmt::Debug for NavigationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationGuard")
            .field("login_path", &self.login_path)
            .field("anonymous_routes", &self.anonymous_routes)
            .finish_non_exhaustive()
    }
}

impl NavigationGuard {
    pub(crate) fn new(
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
        login_path: String,
        anonymous_routes: Vec<AnonymousRoute>,
    ) -> Self {
        Self {
            store,
            navigator,
            clock,
            login_path,
            anonymous_routes,
        }
    }

    /// Allow-listed routes, plus the login page itself.
    fn is_exempt(&self, path: &str) -> bool {
        path.contains(self.login_path.as_str())
            || self.anonymous_routes.iter().any(|route| route.path == path)
    }

    /// Checks session validity for `interaction`.
    ///
    /// When unauthenticated on a route that is neither anonymous nor the
    /// login page, stops the interaction's propagation, redirects to login
    /// and returns `true`.
    ///
    /// Any path containing the login path is exempt in addition to the
    /// configured anonymous routes, so the login form stays usable without
    /// listing it explicitly.
    pub fn on_interaction(&self, interaction: &mut Interaction) -> bool {
        if is_authenticated(&self.store, self.clock.as_ref()) {
            return false;
        }
        let location = self.navigator.location();
        if self.is_exempt(&location.path) {
            return false;
        }

        tracing::debug!(kind = ?interaction.kind(), path = %location.path, "Interaction blocked");
        interaction.stop_propagation();
        redirect_to_login(&self.store, self.navigator.as_ref(), &self.login_path);
        true
    }
}
