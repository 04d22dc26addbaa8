//! Server bootstrap
//!
//! [`EventServer`] wires the pieces together: it spawns the broadcaster and
//! session manager, accepts connections, upgrades them to WebSocket and
//! hands each one to a session. The change feed is spawned separately via
//! [`EventServer::spawn_change_feed`] so the owner controls its restart
//! policy.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::EventServer;
