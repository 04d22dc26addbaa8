//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::store::StoreFilter;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// A single outbound write must complete within this deadline
    pub write_wait: Duration,

    /// Disconnect if the peer sends nothing (pong included) for this long
    pub pong_wait: Duration,

    /// Server ping interval; must stay under `pong_wait`
    pub ping_period: Duration,

    /// Maximum inbound WebSocket message size (None = transport default)
    pub max_message_size: Option<usize>,

    /// Maximum events per pushed frame; larger batches are chunked
    pub max_events_in_message: usize,

    /// Per-session live event queue capacity
    pub queue_capacity: usize,

    /// Per-session outbound frame queue capacity
    pub outbound_capacity: usize,

    /// Change-feed notification wait timeout (bounds cancellation latency)
    pub notify_wait: Duration,

    /// Require a bearer token on every subscribe
    pub require_token: bool,

    /// Narrowing applied to every store query
    pub filter: StoreFilter,

    /// Skip stored events older than this during replay (None = no limit)
    pub event_expires: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            bind_addr: "0.0.0.0:8888".parse().unwrap(),
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: None,
            max_events_in_message: 50,
            queue_capacity: 256,
            outbound_capacity: 512,
            notify_wait: Duration::from_secs(1),
            require_token: false,
            filter: StoreFilter::default(),
            event_expires: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the write deadline
    pub fn write_wait(mut self, timeout: Duration) -> Self {
        self.write_wait = timeout;
        self
    }

    /// Set the peer read deadline; the ping period follows at 9/10 of it
    pub fn pong_wait(mut self, timeout: Duration) -> Self {
        self.pong_wait = timeout;
        self.ping_period = timeout * 9 / 10;
        self
    }

    /// Set the maximum events per pushed frame
    pub fn max_events_in_message(mut self, max: usize) -> Self {
        self.max_events_in_message = max.max(1);
        self
    }

    /// Set the maximum inbound message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Require a bearer token on every subscribe
    pub fn require_token(mut self) -> Self {
        self.require_token = true;
        self
    }

    /// Set the store query filter
    pub fn filter(mut self, filter: StoreFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Skip stored events older than `age` during replay
    pub fn event_expires(mut self, age: Duration) -> Self {
        self.event_expires = Some(age);
        self
    }
}
