//! Registry errors

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by broadcaster operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The named topic has no entry in the index. Raised by unsubscribe and
    /// broadcast; keyed on topic existence, not on any one session's
    /// membership.
    #[error("topic {0} not exist")]
    TopicNotExist(String),

    /// The broadcaster task is gone; no further operations can complete.
    #[error("broadcaster stopped")]
    Shutdown,

    #[error(transparent)]
    Store(#[from] StoreError),
}
