//! Declarative permission gating.
//!
//! ```rust,ignore
//! let rules = PermitRules::new()
//!     .has(["invoices:read"])
//!     .one_of(["admin", "accountant"]);
//!
//! match session.gate(&rules).select(invoice_table, Some(upgrade_banner)) {
//!     Some(view) => render(view),
//!     None => {} // still loading, or denied with no fallback
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::types::PermissionSet;

type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Inclusion rules for gated content.
///
/// - `has`: every listed permission is required (empty: no restriction).
/// - `one_of`: at least one listed permission is required (empty: no restriction).
/// - `condition`: extra predicate ANDed with the result (default: always true).
#[derive(Default, Clone)]
pub struct PermitRules {
    has: Vec<String>,
    one_of: Vec<String>,
    condition: Option<Condition>,
}

impl PermitRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has = permissions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn one_of<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = permissions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }
}

impl fmt::Debug for PermitRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermitRules")
            .field("has", &self.has)
            .field("one_of", &self.one_of)
            .field("condition", &self.condition.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Outcome of gating a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Permissions have not been resolved yet; show nothing.
    Loading,
    Granted,
    Denied,
}

impl Gate {
    #[must_use]
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }

    /// Picks what to display: `content` when granted, `fallback` when
    /// denied, nothing while loading.
    pub fn select<T>(self, content: T, fallback: Option<T>) -> Option<T> {
        match self {
            Self::Loading => None,
            Self::Granted => Some(content),
            Self::Denied => fallback,
        }
    }
}

/// Visibility of content guarded by `rules`.
///
/// Always `false` until `resolved`, so nothing flashes before permissions
/// load. Then `has` is an AND over its entries, `one_of` an OR over its
/// entries that only restricts when non-empty, and the condition is applied
/// last.
#[must_use]
pub fn evaluate(current: &PermissionSet, rules: &PermitRules, resolved: bool) -> bool {
    if !resolved {
        return false;
    }

    let mut visible = rules.has.iter().fold(true, |acc, p| acc && current.contains(p));
    if !rules.one_of.is_empty() {
        visible = visible && rules.one_of.iter().any(|p| current.contains(p));
    }
    visible && rules.condition.as_ref().is_none_or(|condition| condition())
}

/// Three-way form of [`evaluate`].
#[must_use]
pub fn decide(current: &PermissionSet, rules: &PermitRules, resolved: bool) -> Gate {
    if !resolved {
        Gate::Loading
    } else if evaluate(current, rules, resolved) {
        Gate::Granted
    } else {
        Gate::Denied
    }
}

/// `true` if every entry of `required` is present. Empty `required` is `true`.
#[must_use]
pub fn has_permissions<S: AsRef<str>>(current: &PermissionSet, required: &[S]) -> bool {
    required.iter().all(|p| current.contains(p.as_ref()))
}

/// `true` if any entry of `candidates` is present. Empty `candidates` is `false`.
#[must_use]
pub fn has_one_of_permissions<S: AsRef<str>>(current: &PermissionSet, candidates: &[S]) -> bool {
    candidates.iter().any(|p| current.contains(p.as_ref()))
}
