//! # Roomkeeper loopback demo
//!
//! Runs the broker against the in-process loopback chat service with
//! in-memory stores, and plays a short help-desk conversation against it:
//! a staff member takes a pooled room, a client joins, both chat, the
//! broker loses its connection and recovers, and the chat ends.
//!
//! ```text
//! cargo run -p roomkeeper-loopback-demo -- demos/loopback/roomkeeper.toml
//! ```
//!
//! Ctrl+C shuts the broker down gracefully at any point.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use roomkeeper::{BrokerBuilder, BrokerConfig};
use roomkeeper_protocol::loopback::LoopbackService;
use roomkeeper_store::{ConversationId, MemoryStore, PairedRoom, RoomRepository};
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG: &str = "demos/loopback/roomkeeper.toml";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "roomkeeper demo failed");
            eprintln!("roomkeeper demo failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = BrokerConfig::load(&path).with_context(|| format!("loading {path}"))?;
    roomkeeper::logging::init(&config.logging).context("initializing logging")?;

    let service = LoopbackService::new();
    let mut stores = Vec::new();
    let mut broker = BrokerBuilder::from_config(&config, |_| {
        let store = MemoryStore::new();
        stores.push(store.clone());
        store
    })
    .build(service.protocol())
    .context("building broker")?;
    let handle = broker.handle();
    let store = stores.first().cloned().context("no site configured")?;

    let scripted = async {
        tokio::select! {
            outcome = conversation(&service, &store) => match outcome {
                Ok(()) => info!("demo conversation finished"),
                Err(e) => warn!(error = format!("{e:#}"), "demo conversation stopped early"),
            },
            _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
        }
        if handle.shutdown().is_err() {
            debug!("broker already stopped");
        }
    };

    let (result, ()) = tokio::join!(broker.run(), scripted);
    result.context("broker stopped with an error")?;

    let messages = store.conversations.messages().await;
    info!(messages = messages.len(), "conversation log");
    for message in messages {
        info!(sender = %message.sender, role = %message.role, "{}", message.body);
    }
    Ok(())
}

/// Plays a help-desk chat in the first site's pool.
async fn conversation(service: &LoopbackService, store: &MemoryStore) -> Result<()> {
    let room = pooled_room(store).await?;
    info!(room = %room.jid, "staff member takes a pooled room");
    service.join(&room.jid, "alice", &room.password).await?;
    store.paired.assign_conversation(&room.jid, ConversationId(1)).await?;
    pause().await;

    service.join(&room.jid, "bob", &room.password).await?;
    pause().await;
    service.say(&room.jid, "alice", "Hello, how can I help?").await;
    service.say(&room.jid, "bob", "My order never arrived.").await;
    pause().await;

    info!("dropping the broker's connection");
    service.drop_connection().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    service.say(&room.jid, "alice", "Sorry about that, it ships today.").await;
    pause().await;

    service.leave_clean(&room.jid, "bob").await;
    service.leave_clean(&room.jid, "alice").await;
    pause().await;
    Ok(())
}

/// Waits for the broker to fill the pool.
async fn pooled_room(store: &MemoryStore) -> Result<PairedRoom> {
    for _ in 0..50 {
        if let Some(room) = store.paired.get_available().await?.into_iter().next() {
            return Ok(room);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    bail!("no pooled room appeared")
}

async fn pause() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
