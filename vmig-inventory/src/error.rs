//! Inventory error taxonomy.
//!
//! Typed errors from the client and store layers pass through
//! transparently so callers can match on the original cause; the
//! variants added here cover the seams those layers do not own.

use thiserror::Error;

use crate::client::ClientError;
use crate::model::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// An event code no adapter is registered for. Fatal to the
    /// transaction, not to the reconciler loop.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Missing or unusable configuration. Fatal at construction.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// The store conflict sentinel, recovered by bounded retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::Conflict(_)))
    }

    /// A benign race: the referenced object disappeared between event
    /// and fetch.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::NotFound(_)) | Error::Client(ClientError::NotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
