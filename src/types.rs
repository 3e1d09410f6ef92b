use std::collections::HashSet;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::token::DecodedClaims;

/// Set of capability strings derived from the current user's claims.
pub type PermissionSet = HashSet<String>;

/// Access + refresh token pair.
///
/// Produced by a login flow or by a [`TokenRefresher`](crate::TokenRefresher).
/// A new pair replaces the old one; it is never patched in place.
/// Empty strings stand for "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// `true` when neither token is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() && self.refresh_token.is_empty()
    }
}

/// Authenticated user as held by the session.
///
/// Built from the access token's claims and then handed to the
/// [`UserExtender`](crate::UserExtender), which may enrich `claims.extra`
/// (e.g. with a profile fetched from an API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Access token the claims were decoded from.
    pub token: String,
    #[serde(flatten)]
    pub claims: DecodedClaims,
}

impl User {
    #[must_use]
    pub fn new(token: impl Into<String>, claims: DecodedClaims) -> Self {
        Self {
            token: token.into(),
            claims,
        }
    }

    /// Whether the record still carries a usable expiry claim.
    #[must_use]
    pub fn has_expiry(&self) -> bool {
        self.claims.exp > 0
    }

    /// Looks up an issuer-specific claim.
    #[must_use]
    pub fn extra(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.extra.get(name)
    }
}

/// Key under which a token is kept in the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct StorageKey(pub String);

impl StorageKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StorageKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
