//! HTTP + WebSocket relay for shared canvases
//!
//! The relay holds the authoritative store for one workspace: it
//! re-applies every client operation (re-running the lock and role
//! checks), fans accepted operations out to every connection, and
//! serves snapshots for initial load and reconnect recovery.

pub mod handlers;
pub mod router;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use mural_core::{ActorId, GraphStore, MemoryStore, Persistence, Role};
use mural_sync::PresenceState;

/// Fan-out channel depth; slow clients that lag past this miss frames
/// and should re-request a snapshot.
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workspace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9400,
            workspace: "default".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A connected participant, as registered by its hello frame.
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    pub actor: ActorId,
    pub role: Role,
}

/// Shared state behind every connection and handler.
pub struct ServerState {
    pub store: RwLock<GraphStore>,
    /// Serialized `ServerMessage` frames fanned out to every client.
    pub tx: broadcast::Sender<String>,
    pub participants: DashMap<ActorId, Participant>,
    pub presence: DashMap<ActorId, PresenceState>,
    pub persistence: Arc<dyn Persistence>,
    pub workspace: String,
}

impl ServerState {
    pub fn new(store: GraphStore) -> Self {
        Self::with_persistence(store, Arc::new(MemoryStore::new()), "default")
    }

    pub fn with_persistence(
        store: GraphStore,
        persistence: Arc<dyn Persistence>,
        workspace: &str,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        ServerState {
            store: RwLock::new(store),
            tx,
            participants: DashMap::new(),
            presence: DashMap::new(),
            persistence,
            workspace: workspace.to_string(),
        }
    }

    /// Fan a serialized frame out to every subscriber. Succeeds with
    /// zero receivers; an empty room is not an error.
    pub fn broadcast(&self, frame: String) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    /// Write the current graph out. Called on a timer and at shutdown.
    pub async fn save(&self) -> anyhow::Result<()> {
        let snapshot = self.store.read().await.snapshot();
        self.persistence.save_graph(&self.workspace, &snapshot)
    }
}

/// The relay server: owns config and state, serves until shutdown.
pub struct MuralServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl MuralServer {
    pub fn new(config: ServerConfig, state: ServerState) -> Self {
        MuralServer {
            config,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Bind and serve. Runs until the process is stopped.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router::create_router(Arc::clone(&self.state));
        let addr = self.config.addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, workspace = %self.state.workspace, "relay listening");

        // Periodic graph save and tombstone collection.
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(error) = state.save().await {
                    warn!(%error, "periodic graph save failed");
                }
                let collected = state
                    .store
                    .write()
                    .await
                    .collect_tombstones(std::time::Duration::from_secs(10 * 60));
                if collected > 0 {
                    debug!(collected, "collected expired tombstones");
                }
            }
        });

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}
