//! Per-connection session machinery
//!
//! A session owns one client connection end to end: the read pump drives
//! request dispatch, the write pump serializes every outbound frame, and
//! the queue pump reconciles broadcaster fan-out with in-flight replay
//! through the [`PendingQueue`] gate.
//!
//! Teardown always runs through the session manager, which unsubscribes
//! the session from the broadcaster before closing its outbound side, in
//! that order, so no fan-out can land on a closing queue.

pub mod context;
pub mod manager;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod session;

pub use context::SessionContext;
pub use manager::{spawn as spawn_manager, SessionManagerHandle};
pub use queue::PendingQueue;
pub use session::{run_connection, OutboundFrame, Session};
