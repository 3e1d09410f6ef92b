#![doc = include_str!("../README.md")]

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
#[cfg(feature = "guard")]
pub mod guard;
pub mod manager;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;
pub mod traits;
pub mod types;

// Re-exports for convenient access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AnonymousRoute, SessionConfig};
pub use error::{BoxError, Error};
pub use gate::{Gate, PermitRules};
#[cfg(feature = "guard")]
pub use guard::{Interaction, InteractionKind, Location, MemoryNavigator, Navigator};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use scheduler::{REFRESH_BUFFER, RefreshScheduler};
pub use session::{SessionSnapshot, SessionState};
pub use store::{CredentialStore, FileStore, KeyValueStore, MemoryStore, TokenKind};
pub use token::DecodedClaims;
pub use traits::{
    ClaimsPermissions, IdentityExtender, NoRefresh, PermissionParser, TokenRefresher,
    UserExtender, extend_fn, parse_fn, refresh_fn,
};
pub use types::{PermissionSet, StorageKey, TokenPair, User};
