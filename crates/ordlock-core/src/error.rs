//! Error types for ordlock-core.
//!
//! Lock operations never return these: a failing lock operation is an
//! invariant violation and aborts through [`fatal!`](crate::fatal). `Error`
//! covers the two places where a caller can meaningfully react, loading
//! configuration and talking to the kernel wait/wake primitive (whose
//! unexpected failures the primitives then escalate with the mutex name
//! attached).

use thiserror::Error;

/// Configuration and wait/wake backend errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or conflicting configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration could not be extracted.
    #[error("Configuration source error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The wait/wake primitive failed with an unexpected OS error.
    #[error("Wait/wake primitive failed: {0}")]
    Kernel(#[from] std::io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Result type alias for configuration and backend operations.
pub type Result<T> = std::result::Result<T, Error>;
