//! Change-feed listener
//!
//! Bridges the store's notification channel to the broadcaster: each
//! notification names one newly committed offset, which is fetched, decoded
//! and broadcast to its `event_<type>` topic.
//!
//! Failure policy: a fetch or decode failure loses that one notification
//! and the loop keeps going; a failed notification wait is fatal and the
//! owning process is expected to restart the feed. The wait is bounded so
//! cancellation is observed within `notify_wait` even on a silent channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::{self, EventDecoder};
use crate::registry::{BroadcasterHandle, RegistryError};
use crate::store::{EventStore, StoreFilter};

pub struct ChangeFeed {
    store: Arc<dyn EventStore>,
    decoder: Arc<dyn EventDecoder>,
    broadcaster: BroadcasterHandle,
    filter: StoreFilter,
    notify_wait: Duration,
}

impl ChangeFeed {
    pub fn new(
        store: Arc<dyn EventStore>,
        decoder: Arc<dyn EventDecoder>,
        broadcaster: BroadcasterHandle,
        filter: StoreFilter,
        notify_wait: Duration,
    ) -> Self {
        Self {
            store,
            decoder,
            broadcaster,
            filter,
            notify_wait,
        }
    }

    /// Run until cancelled or until the notification channel fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("change feed started");
        let mut notifications = self.store.notifications();

        loop {
            let offset = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("change feed stopped");
                    return Ok(());
                }
                next = timeout(self.notify_wait, notifications.next()) => match next {
                    // Quiet channel; loop to re-check cancellation.
                    Err(_) => continue,
                    Ok(Err(err)) => {
                        tracing::error!(error = %err, "notification wait failed");
                        return Err(err.into());
                    }
                    Ok(Ok(offset)) => offset,
                },
            };
            self.handle_notify(offset).await;
        }
    }

    /// Fetch, decode and broadcast one notified offset. Failures lose this
    /// notification only.
    async fn handle_notify(&self, offset: u64) {
        tracing::debug!(offset, "notify");

        let record = match self.store.fetch_one(offset, &self.filter).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(offset, "no record matched filter");
                return;
            }
            Err(err) => {
                tracing::error!(offset, error = %err, "notify fetch failed");
                return;
            }
        };

        let mut event = match self.decoder.decode(&record.data) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(offset, error = %err, "notify decode failed");
                return;
            }
        };
        event.offset = record.offset;

        let topic = event::topic_for(event.event_type);
        match self.broadcaster.broadcast(&topic, Arc::new(event)).await {
            Ok(delivered) => {
                tracing::debug!(topic = %topic, offset, delivered, "broadcast");
            }
            Err(RegistryError::TopicNotExist(_)) => {
                tracing::debug!(topic = %topic, offset, "no subscribers");
            }
            Err(err) => {
                tracing::warn!(topic = %topic, offset, error = %err, "broadcast failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio::time;

    use super::*;
    use crate::event::{Event, JsonDecoder};
    use crate::registry::{self, SessionHandle};
    use crate::store::MemoryStore;

    fn test_event(event_type: i32) -> Event {
        Event {
            offset: 0,
            sender: "tester".into(),
            casino_id: 1,
            game_id: 2,
            req_id: 3,
            event_type,
            data: serde_json::json!({"n": 1}),
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        broadcaster: BroadcasterHandle,
        cancel: CancellationToken,
    }

    fn start_feed() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let broadcaster = registry::spawn(store.clone(), cancel.clone());
        let feed = ChangeFeed::new(
            store.clone(),
            Arc::new(JsonDecoder::new([0, 1])),
            broadcaster.clone(),
            StoreFilter::default(),
            Duration::from_millis(50),
        );
        tokio::spawn(feed.run(cancel.clone()));
        Fixture {
            store,
            broadcaster,
            cancel,
        }
    }

    async fn subscribe(
        broadcaster: &BroadcasterHandle,
        topic: &str,
    ) -> mpsc::Receiver<Arc<Event>> {
        let (queue, rx) = mpsc::channel(8);
        broadcaster
            .subscribe(
                topic,
                SessionHandle {
                    id: "s1".into(),
                    queue,
                    closed: CancellationToken::new(),
                },
            )
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_routes_events_to_type_topic() {
        let fixture = start_feed();
        let mut rx0 = subscribe(&fixture.broadcaster, "event_0").await;

        fixture.store.push_event(test_event(1));
        fixture.store.push_event(test_event(0));

        // Only the event_0 record reaches this subscriber.
        let event = time::timeout(Duration::from_secs(1), rx0.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.offset, 2);
        assert_eq!(event.event_type, 0);

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn test_decode_failure_skips_one_notification() {
        let fixture = start_feed();
        let mut rx = subscribe(&fixture.broadcaster, "event_0").await;

        fixture.store.push(Bytes::from_static(b"not json"), "", "");
        fixture.store.push_event(test_event(0));

        let event = time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.offset, 2);

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_skipped() {
        let fixture = start_feed();
        let mut rx = subscribe(&fixture.broadcaster, "event_0").await;

        // Type 9 has no schema in the decoder.
        fixture.store.push_event(test_event(9));
        fixture.store.push_event(test_event(0));

        let event = time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.offset, 2);

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_feed() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let broadcaster = registry::spawn(store.clone(), cancel.clone());
        let feed = ChangeFeed::new(
            store,
            Arc::new(JsonDecoder::new([0])),
            broadcaster,
            StoreFilter::default(),
            Duration::from_millis(10),
        );
        let task = tokio::spawn(feed.run(cancel.clone()));

        cancel.cancel();
        let result = time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
