/// Boxed error returned by consumer-provided collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Token decode error: {0}")]
    Token(String),
    #[error("Credential store error: {0}")]
    Store(String),
    #[error("User extension failed: {0}")]
    Extend(String),
    #[error("Token refresh failed: {0}")]
    Refresh(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
