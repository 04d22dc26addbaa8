//! Shared session collaborators.

use std::sync::Arc;

use crate::event::EventDecoder;
use crate::registry::BroadcasterHandle;
use crate::server::ServerConfig;
use crate::store::EventStore;

use super::manager::SessionManagerHandle;

/// Everything a session needs to serve its connection: configuration, the
/// store and decoder collaborators, the broadcaster, and the manager that
/// tracks its lifecycle. Cheap to clone; one per server, shared by all
/// sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn EventStore>,
    pub decoder: Arc<dyn EventDecoder>,
    pub broadcaster: BroadcasterHandle,
    pub sessions: SessionManagerHandle,
}
