//! Persistence collaborator interface
//!
//! The canvas consumes durable storage through this narrow CRUD surface;
//! schema design and query planning live elsewhere. The file-backed
//! implementation keeps everything under a `.mural/` directory as JSON,
//! with operations appended to a log so graph state can be reconstructed
//! after every client disconnects.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::{ActorId, GraphSnapshot, Viewport};
use crate::op::Operation;

/// Storage directory: .mural/
pub const STORE_DIR: &str = ".mural";

/// Snapshot file per workspace
pub const GRAPH_FILE: &str = "graph.json";

/// Append-only operation log per workspace
pub const OPLOG_FILE: &str = "ops.jsonl";

/// The CRUD surface the canvas needs from durable storage.
pub trait Persistence: Send + Sync {
    /// Load the materialized graph for a workspace, if any was saved.
    fn load_graph(&self, workspace: &str) -> anyhow::Result<Option<GraphSnapshot>>;

    /// Save the current materialized graph for a workspace.
    fn save_graph(&self, workspace: &str, snapshot: &GraphSnapshot) -> anyhow::Result<()>;

    /// Durably append one accepted operation. Fire-and-forget from the
    /// caller's perspective; failures are logged, never propagated into
    /// the canvas.
    fn persist_operation(&self, workspace: &str, op: &Operation) -> anyhow::Result<()>;

    /// Each participant's own pan/zoom, restored on next session.
    fn load_viewport(&self, user: ActorId, workspace: &str) -> anyhow::Result<Option<Viewport>>;

    fn save_viewport(
        &self,
        user: ActorId,
        workspace: &str,
        viewport: &Viewport,
    ) -> anyhow::Result<()>;
}

/// JSON files under `<root>/.mural/<workspace>/`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    fn workspace_dir(&self, workspace: &str) -> PathBuf {
        self.root.join(STORE_DIR).join(workspace)
    }

    fn ensure_dir(&self, workspace: &str) -> std::io::Result<PathBuf> {
        let dir = self.workspace_dir(workspace);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    fn viewport_path(&self, user: ActorId, workspace: &str) -> PathBuf {
        self.workspace_dir(workspace)
            .join(format!("viewport-{}.json", user))
    }
}

impl Persistence for FileStore {
    fn load_graph(&self, workspace: &str) -> anyhow::Result<Option<GraphSnapshot>> {
        let path = self.workspace_dir(workspace).join(GRAPH_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&json)?;
        tracing::debug!(
            workspace,
            nodes = snapshot.nodes.len(),
            connections = snapshot.connections.len(),
            "graph loaded from {}",
            path.display()
        );
        Ok(Some(snapshot))
    }

    fn save_graph(&self, workspace: &str, snapshot: &GraphSnapshot) -> anyhow::Result<()> {
        let dir = self.ensure_dir(workspace)?;
        let path = dir.join(GRAPH_FILE);
        let body = serde_json::json!({
            "saved_at": chrono::Utc::now().to_rfc3339(),
            "nodes": snapshot.nodes,
            "connections": snapshot.connections,
        });
        fs::write(&path, serde_json::to_string_pretty(&body)?)?;
        tracing::debug!(workspace, "graph saved to {}", path.display());
        Ok(())
    }

    fn persist_operation(&self, workspace: &str, op: &Operation) -> anyhow::Result<()> {
        let dir = self.ensure_dir(workspace)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(OPLOG_FILE))?;
        let mut line = serde_json::to_string(op)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn load_viewport(&self, user: ActorId, workspace: &str) -> anyhow::Result<Option<Viewport>> {
        let path = self.viewport_path(user, workspace);
        if !path.exists() {
            return Ok(None);
        }
        let viewport: Viewport = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(Some(viewport))
    }

    fn save_viewport(
        &self,
        user: ActorId,
        workspace: &str,
        viewport: &Viewport,
    ) -> anyhow::Result<()> {
        self.ensure_dir(workspace)?;
        let path = self.viewport_path(user, workspace);
        fs::write(&path, serde_json::to_string_pretty(viewport)?)?;
        Ok(())
    }
}

/// Remove everything persisted under `root`.
pub fn clear_store(root: &Path) -> std::io::Result<()> {
    let dir = root.join(STORE_DIR);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// In-memory implementation for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    graphs: Mutex<std::collections::HashMap<String, GraphSnapshot>>,
    oplog: Mutex<Vec<(String, Operation)>>,
    viewports: Mutex<std::collections::HashMap<(ActorId, String), Viewport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn oplog_len(&self) -> usize {
        self.oplog.lock().expect("oplog poisoned").len()
    }
}

impl Persistence for MemoryStore {
    fn load_graph(&self, workspace: &str) -> anyhow::Result<Option<GraphSnapshot>> {
        Ok(self
            .graphs
            .lock()
            .expect("graphs poisoned")
            .get(workspace)
            .cloned())
    }

    fn save_graph(&self, workspace: &str, snapshot: &GraphSnapshot) -> anyhow::Result<()> {
        self.graphs
            .lock()
            .expect("graphs poisoned")
            .insert(workspace.to_string(), snapshot.clone());
        Ok(())
    }

    fn persist_operation(&self, workspace: &str, op: &Operation) -> anyhow::Result<()> {
        self.oplog
            .lock()
            .expect("oplog poisoned")
            .push((workspace.to_string(), op.clone()));
        Ok(())
    }

    fn load_viewport(&self, user: ActorId, workspace: &str) -> anyhow::Result<Option<Viewport>> {
        Ok(self
            .viewports
            .lock()
            .expect("viewports poisoned")
            .get(&(user, workspace.to_string()))
            .cloned())
    }

    fn save_viewport(
        &self,
        user: ActorId,
        workspace: &str,
        viewport: &Viewport,
    ) -> anyhow::Result<()> {
        self.viewports
            .lock()
            .expect("viewports poisoned")
            .insert((user, workspace.to_string()), viewport.clone());
        Ok(())
    }
}
