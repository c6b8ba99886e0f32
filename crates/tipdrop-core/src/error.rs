use thiserror::Error;

pub type TipdropResult<T> = Result<T, TipdropError>;

/// The one message shown to a source or journalist whenever a crypto or
/// storage operation fails. Never varies with the cause.
pub const USER_FACING_FAILURE: &str =
    "the request could not be completed; check your passphrase and try again";

#[derive(Debug, Error)]
pub enum TipdropError {
    /// Fatal misconfiguration. Only produced while the process starts up.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    /// A blob-store path escaped the storage root or was malformed.
    #[error("path error: {0}")]
    Path(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TipdropError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn path(msg: impl Into<String>) -> Self {
        Self::Path(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Self::Path(_))
    }

    /// Collapse this error into a message safe to show at the boundary.
    ///
    /// The `Display` impl keeps internal detail for logs; this must not leak
    /// whether a passphrase was wrong, a source unknown, or a file corrupt.
    pub fn user_message(&self) -> &'static str {
        USER_FACING_FAILURE
    }
}
