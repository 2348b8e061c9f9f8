pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lease;
pub mod model;
pub mod policy;
pub mod rest;
pub mod store;

use std::sync::Arc;

use clock::{SharedClock, SystemClock};
use config::{EngineSettings, ServerSettings, Workspace};
use engine::Engine;
use store::Storage;

/// Shared application state: the Engine plus server settings. Constructed
/// once at startup; the Store handle and the compiled RBAC matrix are the
/// only process-wide state.
pub struct AppContext {
    pub engine: Engine,
    pub server: ServerSettings,
}

impl AppContext {
    /// Open the workspace store and wire up an Engine with the system clock.
    pub async fn open(
        workspace: &Workspace,
        server: ServerSettings,
        settings: EngineSettings,
    ) -> anyhow::Result<Arc<Self>> {
        let storage = Storage::open(&workspace.db_path()).await?;
        let clock: SharedClock = Arc::new(SystemClock);
        let engine = Engine::new(storage, clock, settings);
        Ok(Arc::new(Self { engine, server }))
    }
}
