use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use uuid::Uuid;

use crate::connection::{self, ConnectionHandle};
use crate::directory::RoomDirectory;

/// Process-wide state shared by every connection task.
pub struct ServerState {
    pub directory: RoomDirectory,
    /// Connections that completed the session handshake, by session id.
    pub connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    /// One permit per open socket, handshaking or not.
    slots: Arc<Semaphore>,
    max_connections: usize,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(directory: RoomDirectory, max_connections: usize) -> SharedState {
        Arc::new(Self {
            directory,
            connections: RwLock::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Reserves a slot for a new socket. The slot is released when the
    /// permit drops; `None` means the server is full.
    fn admit(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }

    fn open_sockets(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }
}

pub async fn run(addr: SocketAddr, state: SharedState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    serve(listener, state).await
}

/// Accepts until the process exits. A failed accept is logged and skipped.
pub async fn serve(listener: TcpListener, state: SharedState) -> anyhow::Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };

        let Some(slot) = state.admit() else {
            tracing::warn!(
                "Turning away {}: all {} slots taken",
                peer_addr,
                state.max_connections
            );
            continue;
        };
        tracing::info!(
            "Accepted {} ({}/{} sockets)",
            peer_addr,
            state.open_sockets(),
            state.max_connections
        );

        let state = state.clone();
        tokio::spawn(async move {
            let result = connection::handle_connection(stream, state).await;
            drop(slot);
            if let Err(e) = result {
                tracing::warn!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}
