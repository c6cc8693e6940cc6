use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by every public operation (spec §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("already exists: {0}")]
    AlreadyExists(&'static str),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("logical error: {0}")]
    Logical(String),

    /// Normal iterator exhaustion. Not a failure; kept as a variant so
    /// operators that must *propagate* "exhausted when more was expected"
    /// (as opposed to returning `Ok(None)` from `next_tuple`) have a way to
    /// express it.
    #[error("end of stream")]
    EndOfStream,
}

impl Error {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn logical(msg: impl Into<String>) -> Self {
        Error::Logical(msg.into())
    }
}
