//! State management for the controller
//!
//! `StateManager` owns the store and the mutual-exclusion guards; the engine
//! operations are implemented on it across the sibling modules.

use crate::config::ControllerConfig;
use dashmap::DashMap;
use meshplane_common::{db::Resource, Database, Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// State manager for all controller resources
#[derive(Clone)]
pub struct StateManager {
    config: ControllerConfig,
    db: Database,
    /// Serializes check-then-insert sequences per router
    router_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// Serializes membership validation + insertion per mesh network
    mesh_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl StateManager {
    /// Open the state store configured in `config`
    pub fn open(config: &ControllerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.store_path)?;
        let db = Database::open(config.db_path())?;
        info!("State store at {:?}", config.store_path);
        Ok(Self::with_database(config.clone(), db))
    }

    /// In-memory state (for testing)
    pub fn open_memory(config: ControllerConfig) -> Result<Self> {
        Ok(Self::with_database(config, Database::open_memory()?))
    }

    pub fn with_database(config: ControllerConfig, db: Database) -> Self {
        Self {
            config,
            db,
            router_locks: Arc::new(DashMap::new()),
            mesh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Get database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Guard for one router's allocation and peer-validation sequences
    pub(crate) fn router_lock(&self, router_id: &str) -> Arc<Mutex<()>> {
        self.router_locks
            .entry(router_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Guard for one mesh network's membership sequence
    pub(crate) fn mesh_lock(&self, mesh_network_id: &str) -> Arc<Mutex<()>> {
        self.mesh_locks
            .entry(mesh_network_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn forget_router_lock(&self, router_id: &str) {
        self.router_locks.remove(router_id);
    }

    pub(crate) fn forget_mesh_lock(&self, mesh_network_id: &str) {
        self.mesh_locks.remove(mesh_network_id);
    }

    // ========================================================================
    // Generic lookups
    // ========================================================================

    /// Fetch a resource or fail with not-found
    pub fn must_get<R: Resource>(&self, id: &str) -> Result<R> {
        self.db
            .get_resource(id)?
            .ok_or_else(|| Error::not_found(R::KIND, id))
    }

    /// Fetch a resource by id, falling back to its name
    pub fn lookup<R: Resource>(&self, id_or_name: &str) -> Result<R> {
        if let Some(r) = self.db.get_resource(id_or_name)? {
            return Ok(r);
        }
        self.db
            .get_resource_by_name(id_or_name)?
            .ok_or_else(|| Error::not_found(R::KIND, id_or_name))
    }

    pub fn list<R: Resource>(&self) -> Result<Vec<R>> {
        self.db.list_resources()
    }
}

/// Run `f` for every item, collecting failures instead of stopping
pub(crate) fn for_each_collect<T, F>(items: impl IntoIterator<Item = T>, mut f: F) -> Vec<Error>
where
    F: FnMut(T) -> Result<()>,
{
    items.into_iter().filter_map(|item| f(item).err()).collect()
}
