//! Single-writer topic broadcaster.
//!
//! One task owns the topic→subscriber index outright; every mutation and
//! every fan-out travels through its mailbox, so no operation ever observes
//! the index mid-update. Handles are cheap clones of the mailbox sender.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::store::EventStore;

use super::RegistryError;

const MAILBOX_CAPACITY: usize = 64;

/// A session's inbound event path, as the broadcaster sees it.
///
/// `queue` feeds the session's queue pump; `closed` is cancelled by the
/// session manager once the session is fully deregistered, so the
/// broadcaster can tell a torn-down session from a slow one.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub queue: mpsc::Sender<Arc<Event>>,
    pub closed: CancellationToken,
}

enum Command {
    Subscribe {
        topic: String,
        session: SessionHandle,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        topic: String,
        session_id: String,
        reply: oneshot::Sender<Result<bool, RegistryError>>,
    },
    DropSession {
        session_id: String,
        reply: oneshot::Sender<()>,
    },
    Broadcast {
        topic: String,
        event: Arc<Event>,
        reply: oneshot::Sender<Result<usize, RegistryError>>,
    },
    LastOffset {
        reply: oneshot::Sender<Result<u64, RegistryError>>,
    },
}

/// Clonable handle to the broadcaster task.
#[derive(Clone)]
pub struct BroadcasterHandle {
    tx: mpsc::Sender<Command>,
}

impl BroadcasterHandle {
    /// Add `session` to `topic`, creating the topic entry if absent.
    /// Idempotent; returns whether the session was newly added.
    pub async fn subscribe(
        &self,
        topic: &str,
        session: SessionHandle,
    ) -> Result<bool, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe {
                topic: topic.to_string(),
                session,
                reply,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)
    }

    /// Remove `session_id` from `topic`. Errors when the topic itself has no
    /// entry, regardless of whether this session was ever in it.
    pub async fn unsubscribe(
        &self,
        topic: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Unsubscribe {
                topic: topic.to_string(),
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)?
    }

    /// Remove `session_id` from every topic it appears in. Best-effort; used
    /// on disconnect. The acknowledgement confirms the broadcaster will not
    /// deliver to this session again.
    pub async fn drop_session(&self, session_id: &str) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::DropSession {
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)
    }

    /// Fan `event` out to every subscriber of `topic`, returning how many
    /// sessions it was handed to.
    pub async fn broadcast(
        &self,
        topic: &str,
        event: Arc<Event>,
    ) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Broadcast {
                topic: topic.to_string(),
                event,
                reply,
            })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)?
    }

    /// Highest offset the broadcaster knows of: refreshed by every broadcast,
    /// queried from the store the first time only.
    pub async fn last_offset(&self) -> Result<u64, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::LastOffset { reply })
            .await
            .map_err(|_| RegistryError::Shutdown)?;
        rx.await.map_err(|_| RegistryError::Shutdown)?
    }
}

struct Broadcaster {
    topics: HashMap<String, HashMap<String, SessionHandle>>,
    last_offset: Option<u64>,
    store: Arc<dyn EventStore>,
}

/// Spawn the broadcaster task. It runs until `cancel` fires or every handle
/// is dropped.
pub fn spawn(store: Arc<dyn EventStore>, cancel: CancellationToken) -> BroadcasterHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let broadcaster = Broadcaster {
        topics: HashMap::new(),
        last_offset: None,
        store,
    };
    tokio::spawn(broadcaster.run(rx, cancel));
    BroadcasterHandle { tx }
}

impl Broadcaster {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        tracing::info!("broadcaster started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        tracing::info!("broadcaster stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                topic,
                session,
                reply,
            } => {
                tracing::debug!(topic = %topic, session_id = %session.id, "subscribe");
                let subscribers = self.topics.entry(topic).or_default();
                let added = subscribers
                    .insert(session.id.clone(), session)
                    .is_none();
                let _ = reply.send(added);
            }
            Command::Unsubscribe {
                topic,
                session_id,
                reply,
            } => {
                tracing::debug!(topic = %topic, session_id = %session_id, "unsubscribe");
                let result = match self.topics.get_mut(&topic) {
                    Some(subscribers) => {
                        subscribers.remove(&session_id);
                        if subscribers.is_empty() {
                            self.topics.remove(&topic);
                        }
                        Ok(true)
                    }
                    None => Err(RegistryError::TopicNotExist(topic)),
                };
                let _ = reply.send(result);
            }
            Command::DropSession { session_id, reply } => {
                self.topics.retain(|_, subscribers| {
                    subscribers.remove(&session_id);
                    !subscribers.is_empty()
                });
                let _ = reply.send(());
            }
            Command::Broadcast {
                topic,
                event,
                reply,
            } => {
                tracing::debug!(topic = %topic, offset = event.offset, "broadcast");
                // Every broadcast renews the offset cache, whether or not
                // anyone is subscribed.
                self.last_offset = Some(event.offset);

                let result = match self.topics.get_mut(&topic) {
                    Some(subscribers) => {
                        let mut delivered = 0;
                        let mut stale = Vec::new();
                        for (session_id, session) in subscribers.iter() {
                            if session.closed.is_cancelled() {
                                stale.push(session_id.clone());
                                continue;
                            }
                            match session.queue.try_send(Arc::clone(&event)) {
                                Ok(()) => delivered += 1,
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    tracing::warn!(
                                        session_id = %session_id,
                                        topic = %topic,
                                        offset = event.offset,
                                        "event queue full, dropping event"
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    stale.push(session_id.clone());
                                }
                            }
                        }
                        for session_id in stale {
                            subscribers.remove(&session_id);
                        }
                        if subscribers.is_empty() {
                            self.topics.remove(&topic);
                        }
                        Ok(delivered)
                    }
                    None => Err(RegistryError::TopicNotExist(topic)),
                };
                let _ = reply.send(result);
            }
            Command::LastOffset { reply } => {
                let result = match self.last_offset {
                    Some(offset) => Ok(offset),
                    None => match self.store.max_offset().await {
                        Ok(offset) => {
                            self.last_offset = Some(offset);
                            Ok(offset)
                        }
                        Err(err) => Err(RegistryError::Store(err)),
                    },
                };
                let _ = reply.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_event(offset: u64) -> Arc<Event> {
        Arc::new(Event {
            offset,
            sender: "tester".into(),
            casino_id: 0,
            game_id: 0,
            req_id: 0,
            event_type: 0,
            data: serde_json::Value::Null,
        })
    }

    fn test_session(id: &str, capacity: usize) -> (SessionHandle, mpsc::Receiver<Arc<Event>>) {
        let (queue, rx) = mpsc::channel(capacity);
        (
            SessionHandle {
                id: id.to_string(),
                queue,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    fn spawn_broadcaster() -> (BroadcasterHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn(store.clone(), CancellationToken::new());
        (handle, store)
    }

    #[tokio::test]
    async fn test_subscribe_and_broadcast() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, mut rx) = test_session("s1", 8);

        assert!(broadcaster.subscribe("event_0", session).await.unwrap());
        let delivered = broadcaster
            .broadcast("event_0", test_event(1))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().offset, 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, mut rx) = test_session("s1", 8);

        assert!(broadcaster
            .subscribe("event_0", session.clone())
            .await
            .unwrap());
        assert!(!broadcaster.subscribe("event_0", session).await.unwrap());

        broadcaster
            .broadcast("event_0", test_event(1))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().offset, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_unknown_topic() {
        let (broadcaster, _store) = spawn_broadcaster();
        match broadcaster.broadcast("event_9", test_event(1)).await {
            Err(RegistryError::TopicNotExist(topic)) => assert_eq!(topic, "event_9"),
            other => panic!("expected TopicNotExist, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_keyed_on_topic_existence() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, _rx) = test_session("s1", 8);

        // Unknown topic errors even for a session that never subscribed.
        match broadcaster.unsubscribe("event_0", "s2").await {
            Err(RegistryError::TopicNotExist(_)) => {}
            other => panic!("expected TopicNotExist, got {other:?}"),
        }

        broadcaster.subscribe("event_0", session).await.unwrap();
        // Topic exists, so even a non-member unsubscribe succeeds.
        assert!(broadcaster.unsubscribe("event_0", "s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_topic_removed_with_last_subscriber() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, _rx) = test_session("s1", 8);

        broadcaster.subscribe("event_0", session).await.unwrap();
        broadcaster.unsubscribe("event_0", "s1").await.unwrap();

        match broadcaster.broadcast("event_0", test_event(1)).await {
            Err(RegistryError::TopicNotExist(_)) => {}
            other => panic!("expected TopicNotExist, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_session_removes_from_all_topics() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (s1, _rx1) = test_session("s1", 8);
        let (s2, mut rx2) = test_session("s2", 8);

        broadcaster.subscribe("event_0", s1.clone()).await.unwrap();
        broadcaster.subscribe("event_1", s1).await.unwrap();
        broadcaster.subscribe("event_0", s2).await.unwrap();

        broadcaster.drop_session("s1").await.unwrap();

        // event_1 had only s1, so its entry is gone.
        match broadcaster.broadcast("event_1", test_event(1)).await {
            Err(RegistryError::TopicNotExist(_)) => {}
            other => panic!("expected TopicNotExist, got {other:?}"),
        }

        // event_0 still delivers to s2.
        let delivered = broadcaster
            .broadcast("event_0", test_event(2))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx2.recv().await.unwrap().offset, 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_event_but_keeps_session() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, mut rx) = test_session("s1", 1);

        broadcaster.subscribe("event_0", session).await.unwrap();
        broadcaster
            .broadcast("event_0", test_event(1))
            .await
            .unwrap();
        let delivered = broadcaster
            .broadcast("event_0", test_event(2))
            .await
            .unwrap();
        assert_eq!(delivered, 0);

        // Still subscribed: draining the queue resumes delivery.
        assert_eq!(rx.recv().await.unwrap().offset, 1);
        let delivered = broadcaster
            .broadcast("event_0", test_event(3))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_unsubscribes_session() {
        let (broadcaster, _store) = spawn_broadcaster();
        let (session, rx) = test_session("s1", 8);

        broadcaster.subscribe("event_0", session).await.unwrap();
        drop(rx);

        let delivered = broadcaster
            .broadcast("event_0", test_event(1))
            .await
            .unwrap();
        assert_eq!(delivered, 0);

        // The session was the topic's only subscriber, so the entry is gone.
        match broadcaster.broadcast("event_0", test_event(2)).await {
            Err(RegistryError::TopicNotExist(_)) => {}
            other => panic!("expected TopicNotExist, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_offset_lazy_then_cached() {
        let (broadcaster, store) = spawn_broadcaster();
        store.push(bytes::Bytes::from_static(b"{}"), "", "");
        store.push(bytes::Bytes::from_static(b"{}"), "", "");

        // First query falls through to the store.
        assert_eq!(broadcaster.last_offset().await.unwrap(), 2);

        // Broadcasts renew the cache, topic existence aside.
        let _ = broadcaster.broadcast("event_0", test_event(7)).await;
        assert_eq!(broadcaster.last_offset().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_stops_broadcaster() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let broadcaster = spawn(store, cancel.clone());

        cancel.cancel();
        tokio::task::yield_now().await;

        let (session, _rx) = test_session("s1", 8);
        // Mailbox may still accept briefly; eventually every call errors.
        for _ in 0..64 {
            if broadcaster.subscribe("event_0", session.clone()).await.is_err() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("broadcaster kept accepting after cancel");
    }
}
