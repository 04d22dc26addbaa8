//! Topic registry for event fan-out
//!
//! The registry is a single-writer actor: one task owns the
//! topic→subscriber index and everything else talks to it through a
//! command mailbox.
//!
//! # Architecture
//!
//! ```text
//!                      Broadcaster task
//!                ┌──────────────────────────┐
//!                │ topics: HashMap<Topic,   │
//!                │   HashMap<SessionId,     │
//!                │     SessionHandle>>      │
//!                │ last_offset: Option<u64> │
//!                └────────────┬─────────────┘
//!                   mailbox   │   try_send(Arc<Event>)
//!        ┌────────────────────┼────────────────────┐
//!        │                    │                    │
//!   [ChangeFeed]         [Session]            [Session]
//!   broadcast()          queue pump           queue pump
//! ```
//!
//! A topic entry exists exactly while its subscriber set is non-empty:
//! the entry is created by the first subscribe and removed when the last
//! subscriber leaves, whether by unsubscribe, disconnect cleanup, or a
//! closed delivery queue discovered during fan-out.
//!
//! Events fan out as `Arc<Event>`, so subscribers share one allocation
//! and delivery is reference-counted, not copied.

pub mod broadcaster;
pub mod error;

pub use broadcaster::{spawn, BroadcasterHandle, SessionHandle};
pub use error::RegistryError;
