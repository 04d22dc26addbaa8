//! In-memory [`EventStore`] used by tests and demos.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::event::Event;

use super::{EventStore, NotificationStream, RawRecord, StoreError, StoreFilter};

const NOTIFY_CAPACITY: usize = 1024;

struct StoredRecord {
    data: Bytes,
    account: String,
    name: String,
    stored_at: Instant,
}

struct Inner {
    records: BTreeMap<u64, StoredRecord>,
    tokens: HashSet<String>,
    last_offset: u64,
}

/// Offset-ordered in-memory trace log.
///
/// Offsets start at 1 and are assigned on insert. Every insert is announced
/// on a broadcast channel that [`MemoryStore::notifications`] streams from.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    notify: broadcast::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                tokens: HashSet::new(),
                last_offset: 0,
            }),
            notify,
        }
    }

    /// Append a raw record and announce its offset.
    pub fn push(&self, data: Bytes, account: &str, name: &str) -> u64 {
        let offset = {
            let mut inner = self.inner.lock();
            let offset = inner.last_offset + 1;
            inner.last_offset = offset;
            inner.records.insert(
                offset,
                StoredRecord {
                    data,
                    account: account.to_string(),
                    name: name.to_string(),
                    stored_at: Instant::now(),
                },
            );
            offset
        };
        // No receivers is fine; nobody is listening yet.
        let _ = self.notify.send(offset);
        offset
    }

    /// Append `event` serialized as JSON, stamping its assigned offset into
    /// the stored payload.
    pub fn push_event(&self, mut event: Event) -> u64 {
        let offset = {
            let mut inner = self.inner.lock();
            let offset = inner.last_offset + 1;
            inner.last_offset = offset;
            event.offset = offset;
            let data = serde_json::to_vec(&event).unwrap_or_default();
            inner.records.insert(
                offset,
                StoredRecord {
                    data: Bytes::from(data),
                    account: String::new(),
                    name: String::new(),
                    stored_at: Instant::now(),
                },
            );
            offset
        };
        let _ = self.notify.send(offset);
        offset
    }

    pub fn add_token(&self, token: &str) {
        self.inner.lock().tokens.insert(token.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(record: &StoredRecord, filter: &StoreFilter) -> bool {
    if let Some(account) = &filter.account {
        if &record.account != account {
            return false;
        }
    }
    if let Some(name) = &filter.name {
        if &record.name != name {
            return false;
        }
    }
    true
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn fetch_one(
        &self,
        offset: u64,
        filter: &StoreFilter,
    ) -> Result<Option<RawRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .get(&offset)
            .filter(|record| matches(record, filter))
            .map(|record| RawRecord {
                offset,
                data: record.data.clone(),
            }))
    }

    async fn fetch_all(
        &self,
        from: u64,
        limit: usize,
        max_age: Option<Duration>,
        filter: &StoreFilter,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (&offset, record) in inner.records.range((Bound::Excluded(from), Bound::Unbounded)) {
            if !matches(record, filter) {
                continue;
            }
            if let Some(max_age) = max_age {
                if record.stored_at.elapsed() > max_age {
                    continue;
                }
            }
            out.push(RawRecord {
                offset,
                data: record.data.clone(),
            });
            if limit != 0 && out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    async fn max_offset(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().last_offset)
    }

    async fn token_exists(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().tokens.contains(token))
    }

    fn notifications(&self) -> Box<dyn NotificationStream> {
        Box::new(BroadcastNotifications {
            rx: self.notify.subscribe(),
        })
    }
}

struct BroadcastNotifications {
    rx: broadcast::Receiver<u64>,
}

#[async_trait]
impl NotificationStream for BroadcastNotifications {
    async fn next(&mut self) -> Result<u64, StoreError> {
        loop {
            match self.rx.recv().await {
                Ok(offset) => return Ok(offset),
                // Missed announcements only mean we fetch later offsets when
                // the next one arrives.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(StoreError::NotifyClosed)
                }
            }
        }
    }
}
