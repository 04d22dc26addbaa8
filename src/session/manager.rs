//! Session lifecycle tracking.
//!
//! A single task owns the id→session map, so register and unregister are
//! serialized and teardown happens exactly once per session. Unregister
//! orders the two teardown steps: the broadcaster confirms it will no longer
//! deliver to the session, and only then is the session's outbound side
//! closed.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::registry::{BroadcasterHandle, RegistryError, SessionHandle};

const MAILBOX_CAPACITY: usize = 64;

enum Command {
    Register {
        session: SessionHandle,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        session_id: String,
        reply: oneshot::Sender<()>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Clonable handle to the session manager task.
#[derive(Clone)]
pub struct SessionManagerHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionManagerHandle {
    pub async fn register(&self, session: SessionHandle) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Register { session, reply })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)
    }

    /// Tear the session down: unsubscribe everywhere, then close its
    /// outbound side. Idempotent; the second caller finds nothing to do.
    pub async fn unregister(&self, session_id: &str) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Unregister {
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)
    }

    pub async fn count(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Count { reply })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)
    }
}

struct SessionManager {
    sessions: HashMap<String, SessionHandle>,
    broadcaster: BroadcasterHandle,
}

/// Spawn the session manager task. On cancellation it tears down every
/// session still registered before exiting.
pub fn spawn(
    broadcaster: BroadcasterHandle,
    cancel: CancellationToken,
) -> SessionManagerHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let manager = SessionManager {
        sessions: HashMap::new(),
        broadcaster,
    };
    tokio::spawn(manager.run(rx, cancel));
    SessionManagerHandle { tx }
}

impl SessionManager {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        tracing::info!("session manager started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        let sessions: Vec<String> = self.sessions.keys().cloned().collect();
        for session_id in sessions {
            self.teardown(&session_id).await;
        }
        tracing::info!("session manager stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { session, reply } => {
                tracing::debug!(session_id = %session.id, "session registered");
                self.sessions.insert(session.id.clone(), session);
                let _ = reply.send(());
            }
            Command::Unregister { session_id, reply } => {
                self.teardown(&session_id).await;
                let _ = reply.send(());
            }
            Command::Count { reply } => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    async fn teardown(&mut self, session_id: &str) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        // Unsubscribe first so no broadcast can race the close below.
        if let Err(err) = self.broadcaster.drop_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %err, "drop session");
        }
        session.closed.cancel();
        tracing::debug!(session_id = %session_id, "session unregistered");
    }
}
