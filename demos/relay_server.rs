//! Event relay demo backed by the in-memory store
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                  # binds to 127.0.0.1:8888
//!   cargo run --example relay_server 0.0.0.0:9000     # binds to 0.0.0.0:9000
//!
//! A background task appends one demo event per second, so a connected
//! client sees a live stream. Try it with websocat:
//!
//!   websocat ws://127.0.0.1:8888
//!   {"id":"1","method":"subscribe","params":{"topic":"event_0","offset":0}}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use event_relay::event::{Event, JsonDecoder};
use event_relay::store::{EventStore, MemoryStore};
use event_relay::{EventServer, ServerConfig};

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 127.0.0.1:8888)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr: SocketAddr = match args.get(1) {
        Some(addr) => match addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: invalid bind address '{addr}': {e}");
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "127.0.0.1:8888".parse()?,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("event_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    let decoder = Arc::new(JsonDecoder::new([0, 1]));

    let config = ServerConfig::default().bind(bind_addr);
    let store_dyn: Arc<dyn EventStore> = store.clone();
    let server = EventServer::new(config, store_dyn, decoder);
    server.spawn_change_feed();

    // Append one demo event per second, alternating between two types.
    let producer_store = Arc::clone(&store);
    let producer_cancel = server.cancellation_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut n: u64 = 0;
        loop {
            tokio::select! {
                _ = producer_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let offset = producer_store.push_event(Event {
                        offset: 0,
                        sender: "demo".into(),
                        casino_id: 1,
                        game_id: 1,
                        req_id: n,
                        event_type: (n % 2) as i32,
                        data: serde_json::json!({ "n": n }),
                    });
                    tracing::info!(offset, "demo event stored");
                    n += 1;
                }
            }
        }
    });

    println!("Event relay listening on {bind_addr}");
    println!();
    println!("Subscribe with websocat:");
    println!("  websocat ws://{bind_addr}");
    println!(r#"  {{"id":"1","method":"subscribe","params":{{"topic":"event_0","offset":0}}}}"#);
    println!();

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
