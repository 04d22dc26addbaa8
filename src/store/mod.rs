//! Event store collaborator contract.
//!
//! The relay never talks to a database directly; everything it needs from
//! the persisted trace log goes through [`EventStore`]:
//!
//! - point and range queries over raw records by offset,
//! - the maximum known offset (used to bound replay),
//! - the bearer-token lookup for token-gated subscriptions,
//! - a notification stream announcing newly committed offsets, consumed by
//!   the change feed on its one long-held connection.
//!
//! [`MemoryStore`] implements the whole contract in memory and backs the
//! tests and demos.

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Optional narrowing applied to every record query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreFilter {
    pub account: Option<String>,
    pub name: Option<String>,
}

/// One raw trace-log record: the store offset plus the undecoded payload.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub offset: u64,
    pub data: Bytes,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query: {0}")]
    Query(String),

    /// The notification channel is gone; the change feed cannot continue.
    #[error("notification channel closed")]
    NotifyClosed,
}

/// Blocking wait for the next committed offset.
///
/// One stream is acquired per change feed and held for its whole life; it is
/// not pooled.
#[async_trait]
pub trait NotificationStream: Send {
    async fn next(&mut self) -> Result<u64, StoreError>;
}

/// Range/point queries and lookups over the persisted trace log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch the record at exactly `offset`. `Ok(None)` means no row matched
    /// the offset and filter; it is not an error.
    async fn fetch_one(
        &self,
        offset: u64,
        filter: &StoreFilter,
    ) -> Result<Option<RawRecord>, StoreError>;

    /// Fetch records with offsets strictly greater than `from`, ascending,
    /// at most `limit` rows (`0` = no limit), skipping records older than
    /// `max_age` when set.
    async fn fetch_all(
        &self,
        from: u64,
        limit: usize,
        max_age: Option<Duration>,
        filter: &StoreFilter,
    ) -> Result<Vec<RawRecord>, StoreError>;

    /// Highest offset the store has committed, `0` when empty.
    async fn max_offset(&self) -> Result<u64, StoreError>;

    /// Whether a bearer token is known to the store.
    async fn token_exists(&self, token: &str) -> Result<bool, StoreError>;

    /// Open a dedicated notification stream of newly committed offsets.
    fn notifications(&self) -> Box<dyn NotificationStream>;
}
