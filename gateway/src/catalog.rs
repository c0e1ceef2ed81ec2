//! Static catalog
//!
//! A JSON-loadable, in-memory implementation of the connection directory,
//! permission store and schema cache. Entries may be changed at runtime; every
//! lookup reads the current state.

use async_trait::async_trait;
use guarded_query_core::{SchemaSnapshot, StoredConnection};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::collaborators::{ConnectionDirectory, PermissionStore, SchemaCache};
use crate::error::{GatewayError, Result};

/// One database in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Connection details
    pub connection: StoredConnection,

    /// Tables the caller may read
    #[serde(default)]
    pub allowed_tables: BTreeSet<String>,

    /// Columns that must never be referenced, per table
    #[serde(default)]
    pub masked_columns: BTreeMap<String, BTreeSet<String>>,

    /// Row caps per table
    #[serde(default)]
    pub row_limits: BTreeMap<String, u32>,

    /// Last crawled schema
    #[serde(default)]
    pub schema: Option<SchemaSnapshot>,
}

impl CatalogEntry {
    /// Create an entry with no grants and no schema
    pub fn new(connection: StoredConnection) -> Self {
        Self {
            connection,
            allowed_tables: BTreeSet::new(),
            masked_columns: BTreeMap::new(),
            row_limits: BTreeMap::new(),
            schema: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    databases: HashMap<String, CatalogEntry>,
}

/// In-memory catalog of external databases
#[derive(Debug, Default)]
pub struct StaticCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self {
            entries: RwLock::new(file.databases),
        })
    }

    /// Load a catalog from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let catalog = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!("Loaded {} database(s) from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Number of databases
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Sorted database ids
    pub fn database_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Add or replace a database
    pub fn insert(&self, database_id: impl Into<String>, entry: CatalogEntry) {
        self.write().insert(database_id.into(), entry);
    }

    /// Remove a database
    pub fn remove(&self, database_id: &str) -> Option<CatalogEntry> {
        self.write().remove(database_id)
    }

    /// Replace the granted tables of a database
    pub fn set_allowed_tables<I, S>(&self, database_id: &str, tables: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update(database_id, |entry| {
            entry.allowed_tables = tables.into_iter().map(Into::into).collect();
        })
    }

    /// Replace the masked columns of one table
    pub fn set_masked_columns<I, S>(&self, database_id: &str, table: &str, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update(database_id, |entry| {
            entry
                .masked_columns
                .insert(table.to_string(), columns.into_iter().map(Into::into).collect());
        })
    }

    /// Set the row cap of one table
    pub fn set_row_limit(&self, database_id: &str, table: &str, limit: u32) -> Result<()> {
        self.update(database_id, |entry| {
            entry.row_limits.insert(table.to_string(), limit);
        })
    }

    /// Replace the cached schema of a database
    pub fn set_schema(&self, database_id: &str, schema: Option<SchemaSnapshot>) -> Result<()> {
        self.update(database_id, |entry| entry.schema = schema)
    }

    fn update<F: FnOnce(&mut CatalogEntry)>(&self, database_id: &str, f: F) -> Result<()> {
        let mut entries = self.write();
        let entry = entries
            .get_mut(database_id)
            .ok_or_else(|| GatewayError::NotFound(format!("database '{}'", database_id)))?;
        f(entry);
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CatalogEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entry<T, F: FnOnce(&CatalogEntry) -> T>(&self, database_id: &str, f: F) -> Option<T> {
        self.read().get(database_id).map(f)
    }
}

#[async_trait]
impl ConnectionDirectory for StaticCatalog {
    async fn get_connection(&self, database_id: &str) -> Result<Option<StoredConnection>> {
        Ok(self.with_entry(database_id, |e| e.connection.clone()))
    }
}

#[async_trait]
impl PermissionStore for StaticCatalog {
    async fn get_allowed_tables(&self, database_id: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .with_entry(database_id, |e| e.allowed_tables.clone())
            .unwrap_or_default())
    }

    async fn get_masked_columns(&self, database_id: &str) -> Result<BTreeMap<String, BTreeSet<String>>> {
        Ok(self
            .with_entry(database_id, |e| e.masked_columns.clone())
            .unwrap_or_default())
    }

    async fn get_row_limits(&self, database_id: &str) -> Result<BTreeMap<String, u32>> {
        Ok(self
            .with_entry(database_id, |e| e.row_limits.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SchemaCache for StaticCatalog {
    async fn get_schema(&self, database_id: &str) -> Result<Option<SchemaSnapshot>> {
        Ok(self.with_entry(database_id, |e| e.schema.clone()).flatten())
    }
}
