//! Topic-based WebSocket relay for an offset-ordered event log.
//!
//! Clients connect over WebSocket, subscribe to `event_<type>` topics with a
//! starting offset, and receive a historical backfill followed by an
//! uninterrupted live continuation, with no gaps and no duplicates. The
//! catch-up-then-go-live race is reconciled per session by a pending-queue
//! gate: live events arriving mid-replay are parked, then flushed above the
//! replay's final offset before the gate latches open.
//!
//! # Architecture
//!
//! ```text
//!   store notify ──► ChangeFeed ──► Broadcaster ──► Session queue pump ──► client
//!                      (decode)      (fan-out)       (gate + chunking)
//!
//!   client request ──► Session read pump ──► Method dispatch ──► Broadcaster
//!                                                │
//!                                                └─► replay via EventStore
//! ```
//!
//! The store and the payload decoder are collaborators behind the
//! [`store::EventStore`] and [`event::EventDecoder`] traits;
//! [`store::MemoryStore`] and [`event::JsonDecoder`] back the tests and
//! demos.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use event_relay::event::JsonDecoder;
//! use event_relay::server::{EventServer, ServerConfig};
//! use event_relay::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> event_relay::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let decoder = Arc::new(JsonDecoder::new([0, 1, 2]));
//!     let server = EventServer::new(ServerConfig::default(), store, decoder);
//!     server.spawn_change_feed();
//!     server.run().await
//! }
//! ```

pub mod error;
pub mod event;
pub mod feed;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use event::Event;
pub use server::{EventServer, ServerConfig};
