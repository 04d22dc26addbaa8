//! Crate-wide error type.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
///
/// Transport failures are fatal to the one connection that produced them;
/// store and decode failures abort the operation that issued the query and
/// leave the connection open.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket-level read/write failure.
    #[error("transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket-level failure (bind, accept, configure).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound frame could not be serialized.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Bearer token was rejected by the store-backed lookup.
    #[error("user not exist")]
    UserNotExist,

    /// A write did not complete within the configured write deadline.
    #[error("write deadline exceeded")]
    WriteDeadline,

    /// The session's outbound path is gone; the connection is tearing down.
    #[error("connection closed")]
    ConnectionClosed,
}
