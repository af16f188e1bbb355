//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use mural_core::{clear_store, FileStore, GraphStore, Persistence};
use mural_server::{MuralServer, ServerConfig, ServerState};

pub async fn serve(
    root: PathBuf,
    host: String,
    port: u16,
    workspace: String,
) -> anyhow::Result<()> {
    tracing::info!("Starting Mural relay on {}:{}", host, port);

    let persistence: Arc<dyn Persistence> = Arc::new(FileStore::new(&root));

    // Load the saved canvas, or start empty.
    let mut store = GraphStore::new();
    match persistence.load_graph(&workspace)? {
        Some(snapshot) => {
            store.restore(snapshot);
            tracing::info!(
                "Loaded workspace '{}': {} nodes, {} connections",
                workspace,
                store.node_count(),
                store.connection_count()
            );
        }
        None => {
            tracing::info!("Workspace '{}' starts empty", workspace);
        }
    }

    let config = ServerConfig {
        host,
        port,
        workspace: workspace.clone(),
    };
    let state = ServerState::with_persistence(store, persistence, &workspace);
    let server = MuralServer::new(config, state);

    server.start().await
}

pub fn export(root: PathBuf, workspace: String) -> anyhow::Result<()> {
    let persistence = FileStore::new(&root);
    match persistence.load_graph(&workspace)? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => {
            anyhow::bail!("workspace '{}' has no saved canvas", workspace)
        }
    }
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Clearing persisted data under: {}", root.display());
    clear_store(&root)?;
    tracing::info!("Data cleared");
    Ok(())
}
