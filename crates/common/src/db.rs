//! SQLite database for Meshplane state persistence

use crate::types::*;
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Table name constants
pub mod tables {
    pub const ROUTERS: &str = "routers";
    pub const IFACES: &str = "ifaces";
    pub const IFACE_PEERS: &str = "iface_peers";
    pub const MESH_NETWORKS: &str = "mesh_networks";
    pub const MESH_NETWORK_MEMBERS: &str = "mesh_network_members";
    pub const ROUTES: &str = "routes";
    pub const RULES: &str = "rules";
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let mut ddl = String::new();
        for table in [
            tables::ROUTERS,
            tables::IFACES,
            tables::IFACE_PEERS,
            tables::MESH_NETWORKS,
            tables::MESH_NETWORK_MEMBERS,
            tables::ROUTES,
            tables::RULES,
        ] {
            ddl.push_str(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    spec TEXT NOT NULL,
                    status TEXT NOT NULL,
                    labels TEXT NOT NULL DEFAULT '{{}}',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    generation INTEGER NOT NULL DEFAULT 1
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_name ON {table}(name);
                "#
            ));
        }

        ddl.push_str(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_routers_name ON routers(name);
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_mesh_networks_name ON mesh_networks(name);

            CREATE INDEX IF NOT EXISTS idx_ifaces_router ON ifaces(json_extract(spec, '$.router_id'));
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_ifaces_router_ifname
                ON ifaces(json_extract(spec, '$.router_id'), json_extract(spec, '$.ifname'));

            CREATE INDEX IF NOT EXISTS idx_iface_peers_iface ON iface_peers(json_extract(spec, '$.iface_id'));
            CREATE INDEX IF NOT EXISTS idx_iface_peers_peer_iface ON iface_peers(json_extract(spec, '$.peer_iface_id'));
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_iface_peers_iface_key
                ON iface_peers(json_extract(spec, '$.iface_id'), json_extract(spec, '$.public_key'));

            CREATE UNIQUE INDEX IF NOT EXISTS uniq_members_network_router
                ON mesh_network_members(json_extract(spec, '$.mesh_network_id'), json_extract(spec, '$.router_id'));

            CREATE INDEX IF NOT EXISTS idx_routes_iface ON routes(json_extract(spec, '$.iface_id'));
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_routes_router_network
                ON routes(json_extract(spec, '$.router_id'), json_extract(spec, '$.network'));

            CREATE INDEX IF NOT EXISTS idx_rules_router ON rules(json_extract(spec, '$.router_id'));
            "#,
        );

        conn.execute_batch(&ddl)?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Generic CRUD operations
    // ========================================================================

    /// Insert a resource
    pub fn insert<S: Serialize, T: Serialize>(
        &self,
        table: &str,
        meta: &ResourceMeta,
        spec: &S,
        status: &T,
    ) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                "INSERT INTO {} (id, name, spec, status, labels, created_at, updated_at, generation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                table
            ),
            params![
                meta.id,
                meta.name,
                serde_json::to_string(spec)?,
                serde_json::to_string(status)?,
                serde_json::to_string(&meta.labels)?,
                meta.created_at,
                meta.updated_at,
                meta.generation,
            ],
        )?;

        debug!("Inserted {} with id {}", table, meta.id);
        Ok(())
    }

    /// Update a resource
    pub fn update<S: Serialize, T: Serialize>(
        &self,
        table: &str,
        id: &str,
        spec: Option<&S>,
        status: Option<&T>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        if let Some(spec) = spec {
            conn.execute(
                &format!(
                    "UPDATE {} SET spec = ?1, updated_at = ?2, generation = generation + 1 WHERE id = ?3",
                    table
                ),
                params![serde_json::to_string(spec)?, now, id],
            )?;
        }

        if let Some(status) = status {
            conn.execute(
                &format!("UPDATE {} SET status = ?1, updated_at = ?2 WHERE id = ?3", table),
                params![serde_json::to_string(status)?, now, id],
            )?;
        }

        debug!("Updated {} with id {}", table, id);
        Ok(())
    }

    /// Get a resource by ID
    pub fn get<S: DeserializeOwned, T: DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<ResourceRow<S, T>>> {
        self.query_one(table, "id = ?1", id)
    }

    /// Get a resource by name
    pub fn get_by_name<S: DeserializeOwned, T: DeserializeOwned>(
        &self,
        table: &str,
        name: &str,
    ) -> Result<Option<ResourceRow<S, T>>> {
        self.query_one(table, "name = ?1", name)
    }

    fn query_one<S: DeserializeOwned, T: DeserializeOwned>(
        &self,
        table: &str,
        predicate: &str,
        value: &str,
    ) -> Result<Option<ResourceRow<S, T>>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                &format!(
                    "SELECT id, name, spec, status, labels, created_at, updated_at, generation
                     FROM {} WHERE {} ORDER BY rowid LIMIT 1",
                    table, predicate
                ),
                params![value],
                RawRow::from_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// List all resources in insertion order
    pub fn list<S: DeserializeOwned, T: DeserializeOwned>(
        &self,
        table: &str,
    ) -> Result<Vec<ResourceRow<S, T>>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, spec, status, labels, created_at, updated_at, generation
             FROM {} ORDER BY rowid",
            table
        ))?;

        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }

    /// List resources whose spec field equals `value`, in insertion order
    pub fn list_by<S: DeserializeOwned, T: DeserializeOwned>(
        &self,
        table: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<ResourceRow<S, T>>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, spec, status, labels, created_at, updated_at, generation
             FROM {} WHERE json_extract(spec, '$.{}') = ?1 ORDER BY rowid",
            table, field
        ))?;

        let rows = stmt.query_map(params![value], RawRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }

        Ok(results)
    }

    /// Delete a resource
    pub fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])?;

        if rows > 0 {
            debug!("Deleted {} with id {}", table, id);
        }

        Ok(rows > 0)
    }

    /// Check if a resource exists
    pub fn exists(&self, table: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table),
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if a name is taken
    pub fn name_exists(&self, table: &str, name: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE name = ?1", table),
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    pub fn insert_resource<R: Resource>(&self, resource: &R) -> Result<()> {
        self.insert(R::TABLE, resource.meta(), resource.spec(), resource.status())
    }

    pub fn get_resource<R: Resource>(&self, id: &str) -> Result<Option<R>> {
        let row: Option<ResourceRow<R::Spec, R::Status>> = self.get(R::TABLE, id)?;
        Ok(row.map(R::from_row))
    }

    pub fn get_resource_by_name<R: Resource>(&self, name: &str) -> Result<Option<R>> {
        let row: Option<ResourceRow<R::Spec, R::Status>> = self.get_by_name(R::TABLE, name)?;
        Ok(row.map(R::from_row))
    }

    pub fn list_resources<R: Resource>(&self) -> Result<Vec<R>> {
        let rows: Vec<ResourceRow<R::Spec, R::Status>> = self.list(R::TABLE)?;
        Ok(rows.into_iter().map(R::from_row).collect())
    }

    pub fn list_resources_by<R: Resource>(&self, field: &str, value: &str) -> Result<Vec<R>> {
        let rows: Vec<ResourceRow<R::Spec, R::Status>> = self.list_by(R::TABLE, field, value)?;
        Ok(rows.into_iter().map(R::from_row).collect())
    }

    pub fn update_resource_spec<R: Resource>(&self, id: &str, spec: &R::Spec) -> Result<()> {
        self.update(R::TABLE, id, Some(spec), None::<&R::Status>)
    }

    pub fn update_resource_status<R: Resource>(&self, id: &str, status: &R::Status) -> Result<()> {
        self.update(R::TABLE, id, None::<&R::Spec>, Some(status))
    }

    pub fn delete_resource<R: Resource>(&self, id: &str) -> Result<bool> {
        self.delete(R::TABLE, id)
    }
}

/// Raw database row before parsing
struct RawRow {
    id: String,
    name: String,
    spec: String,
    status: String,
    labels: String,
    created_at: i64,
    updated_at: i64,
    generation: i64,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRow {
            id: row.get(0)?,
            name: row.get(1)?,
            spec: row.get(2)?,
            status: row.get(3)?,
            labels: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            generation: row.get(7)?,
        })
    }

    fn parse<S: DeserializeOwned, T: DeserializeOwned>(self) -> Result<ResourceRow<S, T>> {
        Ok(ResourceRow {
            id: self.id,
            name: self.name,
            spec: serde_json::from_str(&self.spec)?,
            status: serde_json::from_str(&self.status)?,
            labels: serde_json::from_str(&self.labels)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            generation: self.generation,
        })
    }
}

/// Parsed resource row
#[derive(Debug, Clone)]
pub struct ResourceRow<S, T> {
    pub id: String,
    pub name: String,
    pub spec: S,
    pub status: T,
    pub labels: HashMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub generation: i64,
}

impl<S, T> ResourceRow<S, T> {
    fn into_meta(self) -> (ResourceMeta, S, T) {
        (
            ResourceMeta {
                id: self.id,
                name: self.name,
                labels: self.labels,
                created_at: self.created_at,
                updated_at: self.updated_at,
                generation: self.generation,
            },
            self.spec,
            self.status,
        )
    }
}

/// A persisted entity: metadata plus spec plus (possibly empty) status
pub trait Resource: Sized {
    const TABLE: &'static str;
    const KIND: &'static str;
    type Spec: Serialize + DeserializeOwned;
    type Status: Serialize + DeserializeOwned;

    fn from_row(row: ResourceRow<Self::Spec, Self::Status>) -> Self;
    fn meta(&self) -> &ResourceMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> &Self::Status;
}

macro_rules! stateless_resource {
    ($ty:ty, $spec:ty, $table:expr, $kind:expr) => {
        impl Resource for $ty {
            const TABLE: &'static str = $table;
            const KIND: &'static str = $kind;
            type Spec = $spec;
            type Status = ();

            fn from_row(row: ResourceRow<$spec, ()>) -> Self {
                let (meta, spec, _) = row.into_meta();
                Self { meta, spec }
            }
            fn meta(&self) -> &ResourceMeta {
                &self.meta
            }
            fn spec(&self) -> &$spec {
                &self.spec
            }
            fn status(&self) -> &() {
                &()
            }
        }
    };
}

impl Resource for Router {
    const TABLE: &'static str = tables::ROUTERS;
    const KIND: &'static str = "router";
    type Spec = RouterSpec;
    type Status = RouterStatus;

    fn from_row(row: ResourceRow<RouterSpec, RouterStatus>) -> Self {
        let (meta, spec, status) = row.into_meta();
        Self { meta, spec, status }
    }
    fn meta(&self) -> &ResourceMeta {
        &self.meta
    }
    fn spec(&self) -> &RouterSpec {
        &self.spec
    }
    fn status(&self) -> &RouterStatus {
        &self.status
    }
}

stateless_resource!(Iface, IfaceSpec, tables::IFACES, "iface");
stateless_resource!(IfacePeer, IfacePeerSpec, tables::IFACE_PEERS, "iface_peer");
stateless_resource!(MeshNetwork, MeshNetworkSpec, tables::MESH_NETWORKS, "mesh_network");
stateless_resource!(
    MeshNetworkMember,
    MeshNetworkMemberSpec,
    tables::MESH_NETWORK_MEMBERS,
    "mesh_network_member"
);
stateless_resource!(Route, RouteSpec, tables::ROUTES, "route");
stateless_resource!(Rule, RuleSpec, tables::RULES, "rule");
