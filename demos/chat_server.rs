//! Broadcast chat server.
//!
//! The first text message a client sends becomes its nickname; every later
//! message is relayed to all connected clients as `[nickname] message`.
//!
//! Run with: `RUST_LOG=debug cargo run --example chat_server`

use std::collections::HashMap;
use std::error::Error;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsengine::{Config, ConnectionHandle, ConnectionId, Handler, Registry, Server};

const ADDR: &str = "127.0.0.1:8081";

struct ChatHandler {
    registry: Registry,
    nicknames: Mutex<HashMap<ConnectionId, String>>,
}

impl Handler for ChatHandler {
    async fn on_text(&self, conn: &ConnectionHandle, text: String) {
        let line = {
            let mut nicknames = self.nicknames.lock().await;
            match nicknames.get(&conn.id()) {
                Some(nickname) => format!("[{}] {}", nickname, text),
                None => {
                    let line = format!("{} entered", text);
                    nicknames.insert(conn.id(), text);
                    line
                }
            }
        };
        self.registry.broadcast_text(&line).await;
    }

    async fn on_connection_closed(&self, conn: &ConnectionHandle, code: u16, _reason: &str) {
        let nickname = self.nicknames.lock().await.remove(&conn.id());
        info!(id = conn.id(), code, nickname = ?nickname, "client left");
        if let Some(nickname) = nickname {
            self.registry
                .broadcast_text(&format!("{} left", nickname))
                .await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::new();
    let handler = ChatHandler {
        registry: registry.clone(),
        nicknames: Mutex::new(HashMap::new()),
    };

    let server = Server::bind(ADDR, Config::server(), registry, handler).await?;
    info!(addr = %server.local_addr()?, "chat server ready");
    server.serve().await?;
    Ok(())
}
