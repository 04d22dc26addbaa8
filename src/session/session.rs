//! Per-connection session.
//!
//! Each connection runs three cooperating tasks:
//!
//! - the **read pump** owns the inbound half: it enforces the peer read
//!   deadline, parses requests and drives dispatch; any failure here tears
//!   the whole session down,
//! - the **write pump** owns the outbound half: every frame the session
//!   sends funnels through one queue, so socket writes are never
//!   interleaved; each frame carries a completion slot the write pump
//!   resolves after the socket write, which is how senders learn about
//!   write failures,
//! - the **queue pump** drains events fanned out by the broadcaster,
//!   parking them while a replay holds the gate closed and forwarding them
//!   directly once it opens.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::{self, Event};
use crate::protocol::{self, ResponseMessage, CODE_APPLICATION};
use crate::registry::SessionHandle;
use crate::store::RawRecord;

use super::context::SessionContext;
use super::queue::PendingQueue;

/// One outbound frame plus the slot its sender is waiting on.
pub struct OutboundFrame {
    pub data: String,
    pub done: oneshot::Sender<Result<()>>,
}

pub struct Session {
    id: String,
    context: SessionContext,
    out_tx: mpsc::Sender<OutboundFrame>,
    queue_tx: mpsc::Sender<Arc<Event>>,
    pending: PendingQueue,
    /// Replay cursor: set from the subscribe request and advanced after
    /// every transmitted batch.
    offset: Mutex<u64>,
    /// Highest offset actually covered for this client: latched from the
    /// cursor when the gate first opens, then advanced per transmission.
    /// Unlike the cursor it never jumps on a later subscribe, so it is the
    /// safe floor for skipping live events.
    delivered: Mutex<u64>,
    closed: CancellationToken,
}

impl Session {
    pub fn new(
        id: String,
        context: SessionContext,
        out_tx: mpsc::Sender<OutboundFrame>,
        queue_tx: mpsc::Sender<Arc<Event>>,
        closed: CancellationToken,
    ) -> Self {
        tracing::debug!(session_id = %id, "new session");
        Self {
            id,
            context,
            out_tx,
            queue_tx,
            pending: PendingQueue::new(),
            offset: Mutex::new(0),
            delivered: Mutex::new(0),
            closed,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The broadcaster-facing view of this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            queue: self.queue_tx.clone(),
            closed: self.closed.clone(),
        }
    }

    pub fn offset(&self) -> u64 {
        *self.offset.lock()
    }

    pub fn set_offset(&self, offset: u64) {
        *self.offset.lock() = offset;
    }

    pub fn delivered(&self) -> u64 {
        *self.delivered.lock()
    }

    fn advance_delivered(&self, offset: u64) {
        let mut delivered = self.delivered.lock();
        if offset > *delivered {
            *delivered = offset;
        }
    }

    /// Verify the bearer token when one was supplied or when the server
    /// demands one.
    pub async fn authorize(&self, token: &str) -> Result<()> {
        if token.is_empty() && !self.context.config.require_token {
            return Ok(());
        }
        if self.context.store.token_exists(token).await? {
            Ok(())
        } else {
            Err(Error::UserNotExist)
        }
    }

    pub async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.context
            .broadcaster
            .subscribe(topic, self.handle())
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<bool> {
        Ok(self.context.broadcaster.unsubscribe(topic, &self.id).await?)
    }

    /// Hand one frame to the write pump and wait for the socket write to
    /// complete.
    pub async fn send(&self, data: String) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.out_tx
            .send(OutboundFrame { data, done })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        ack.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Send `events` split into frames of at most `max_events_in_message`,
    /// advancing the session offset after each transmitted chunk.
    pub async fn send_chunked(&self, events: &[Arc<Event>]) -> Result<()> {
        for chunk in events.chunks(self.context.config.max_events_in_message) {
            let frame = protocol::new_event_message(chunk)?;
            self.send(frame).await?;
            if let Some(last) = chunk.last() {
                self.set_offset(last.offset);
                self.advance_delivered(last.offset);
            }
        }
        Ok(())
    }

    /// Handle one inbound request frame. Protocol-level rejections are
    /// acknowledged and then returned as errors, terminating the read path;
    /// application-level failures are acknowledged and the connection
    /// stays up.
    pub async fn process(&self, raw: &[u8]) -> Result<()> {
        let mut response = ResponseMessage::default();
        let method = match protocol::parse_request(raw, &mut response) {
            Ok(method) => method,
            Err(err) => {
                let frame = response.with_protocol_error(&err).encode()?;
                // Best effort; this connection is going down either way.
                let _ = self.send(frame).await;
                return Err(Error::Protocol(err));
            }
        };

        match method.execute(self).await {
            Ok(result) => {
                tracing::debug!(session_id = %self.id, id = ?response.id, "request ok");
                let frame = response.with_result(result).encode()?;
                self.send(frame).await?;
                method.after(self).await
            }
            Err(err) => {
                tracing::debug!(
                    session_id = %self.id,
                    id = ?response.id,
                    error = %err,
                    "request failed"
                );
                let frame = response
                    .with_error(CODE_APPLICATION, err.to_string())
                    .encode()?;
                self.send(frame).await
            }
        }
    }

    /// Replay history for `topics` from `offset`, then flush everything the
    /// gate parked meanwhile and latch it open. Runs after the subscribe
    /// acknowledgement, before any live event reaches the client.
    pub async fn finish_subscribe(&self, topics: &[String], offset: u64) -> Result<()> {
        tracing::debug!(session_id = %self.id, offset, "replay after subscribe");

        let mut event_types = Vec::with_capacity(topics.len());
        for topic in topics {
            match event::event_type_from_topic(topic) {
                Ok(event_type) => event_types.push(event_type),
                Err(err) => {
                    tracing::warn!(session_id = %self.id, error = %err, "no replay for topic");
                }
            }
        }

        if !event_types.is_empty() {
            self.replay(offset, &event_types).await?;
        }

        // Flush-and-latch: the gate only opens while the buffer is empty, so
        // an event arriving mid-flush forces another round instead of being
        // lost behind the latch.
        loop {
            let parked = event::filter_from_offset(self.pending.take(), self.offset());
            if !parked.is_empty() {
                self.send_chunked(&parked).await?;
                continue;
            }
            if self.pending.is_open() {
                break;
            }
            // Everything at or below the cursor was covered by this first
            // replay and flush; latch that floor before opening so the queue
            // pump can dedup against it.
            self.advance_delivered(self.offset());
            if self.pending.open_if_empty() {
                break;
            }
        }
        Ok(())
    }

    /// Page through stored history above `from` and send every event whose
    /// type is subscribed. Store and decode failures end the replay early
    /// and are logged; only transport failures propagate.
    async fn replay(&self, from: u64, event_types: &[i32]) -> Result<()> {
        let config = &self.context.config;

        let last = match self.context.broadcaster.last_offset().await {
            Ok(last) => last,
            Err(err) => {
                tracing::error!(session_id = %self.id, error = %err, "replay last offset");
                return Ok(());
            }
        };

        let mut cursor = from;
        while cursor < last {
            let records = match self
                .context
                .store
                .fetch_all(
                    cursor,
                    config.max_events_in_message,
                    config.event_expires,
                    &config.filter,
                )
                .await
            {
                Ok(records) => records,
                Err(err) => {
                    tracing::error!(session_id = %self.id, error = %err, "replay fetch");
                    return Ok(());
                }
            };

            let Some(tail) = records.last() else {
                break;
            };
            cursor = tail.offset;

            let events = self.decode_records(records);
            let matched = event::filter_by_event_types(&events, event_types);
            if !matched.is_empty() {
                self.send_chunked(&matched).await?;
            }
            // The cursor covers filtered-out records too.
            self.set_offset(cursor);
        }
        Ok(())
    }

    fn decode_records(&self, records: Vec<RawRecord>) -> Vec<Arc<Event>> {
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            match self.context.decoder.decode(&record.data) {
                Ok(mut event) => {
                    event.offset = record.offset;
                    events.push(Arc::new(event));
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %self.id,
                        offset = record.offset,
                        error = %err,
                        "skipping undecodable record"
                    );
                }
            }
        }
        events
    }
}

/// Inbound half: read deadline, request dispatch, teardown trigger.
pub async fn read_pump(session: Arc<Session>, mut stream: SplitStream<WebSocketStream<TcpStream>>) {
    tracing::debug!(session_id = %session.id, "read pump start");

    loop {
        let frame = tokio::select! {
            _ = session.closed.cancelled() => break,
            frame = timeout(session.context.config.pong_wait, stream.next()) => frame,
        };

        match frame {
            Err(_) => {
                tracing::debug!(session_id = %session.id, "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(session_id = %session.id, error = %err, "read error");
                break;
            }
            Ok(Some(Ok(message))) => {
                let raw = match &message {
                    Message::Text(text) => text.as_bytes(),
                    Message::Binary(data) => data.as_slice(),
                    Message::Close(_) => break,
                    // Pong or ping traffic renews the deadline by arriving.
                    _ => continue,
                };
                if let Err(err) = session.process(raw).await {
                    tracing::error!(session_id = %session.id, error = %err, "process error");
                    break;
                }
            }
        }
    }

    if let Err(err) = session.context.sessions.unregister(&session.id).await {
        tracing::warn!(session_id = %session.id, error = %err, "unregister");
    }
    tracing::debug!(session_id = %session.id, "read pump stop");
}

/// Outbound half: single writer over the socket, keepalive pings, write
/// deadline enforcement.
pub async fn write_pump(
    session: Arc<Session>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
) {
    let write_wait = session.context.config.write_wait;
    let ping_period = session.context.config.ping_period;
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    tracing::debug!(session_id = %session.id, "write pump start");

    loop {
        tokio::select! {
            _ = session.closed.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = out_rx.recv() => match frame {
                Some(OutboundFrame { data, done }) => {
                    let result = match timeout(write_wait, sink.send(Message::Text(data))).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(Error::Transport(err)),
                        Err(_) => Err(Error::WriteDeadline),
                    };
                    let failed = result.is_err();
                    let _ = done.send(result);
                    if failed {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(write_wait, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::debug!(session_id = %session.id, error = %err, "ping failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(session_id = %session.id, "ping write deadline");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    if let Err(err) = session.context.sessions.unregister(&session.id).await {
        tracing::warn!(session_id = %session.id, error = %err, "unregister");
    }
    tracing::debug!(session_id = %session.id, "write pump stop");
}

/// Broadcaster-facing half: park events behind the gate during replay,
/// forward them once it opens.
pub async fn queue_pump(session: Arc<Session>, mut queue_rx: mpsc::Receiver<Arc<Event>>) {
    tracing::debug!(session_id = %session.id, "queue pump start");

    loop {
        let event = tokio::select! {
            _ = session.closed.cancelled() => break,
            event = queue_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        if session.pending.enqueue(Arc::clone(&event)) {
            continue;
        }
        // Replay or flush may already have transmitted this offset. The
        // delivered floor only moves with actual transmissions, so a later
        // subscribe with a far-future offset cannot suppress live topics.
        if event.offset <= session.delivered() {
            continue;
        }
        if let Err(err) = session.send_chunked(std::slice::from_ref(&event)).await {
            tracing::debug!(session_id = %session.id, error = %err, "queue pump send");
            break;
        }
    }

    tracing::debug!(session_id = %session.id, "queue pump stop");
}

/// Serve one upgraded connection until it closes: register the session,
/// split the socket and run the three pumps to completion.
pub async fn run_connection(
    id: String,
    context: SessionContext,
    ws: WebSocketStream<TcpStream>,
) -> Result<()> {
    let (out_tx, out_rx) = mpsc::channel(context.config.outbound_capacity.max(1));
    let (queue_tx, queue_rx) = mpsc::channel(context.config.queue_capacity.max(1));
    let closed = CancellationToken::new();
    let session = Arc::new(Session::new(id, context.clone(), out_tx, queue_tx, closed));

    context.sessions.register(session.handle()).await?;

    let (sink, stream) = ws.split();
    let write = tokio::spawn(write_pump(Arc::clone(&session), out_rx, sink));
    let queue = tokio::spawn(queue_pump(Arc::clone(&session), queue_rx));
    read_pump(Arc::clone(&session), stream).await;
    let _ = write.await;
    let _ = queue.await;
    Ok(())
}
