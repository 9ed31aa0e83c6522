//! Watch multiplexer error types.

use thiserror::Error;

/// Errors raised by remotes and the remote container.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote cannot be started: missing REST configuration, or the
    /// remote was never registered in a container.
    #[error("configuration: {0}")]
    Configuration(String),
}

/// Result type for watch multiplexer operations.
pub type Result<T> = std::result::Result<T, Error>;
