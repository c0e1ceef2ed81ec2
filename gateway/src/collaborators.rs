//! Collaborator interfaces
//!
//! The gateway consumes credentials, cached schemas and permissions from
//! systems it does not own. Each is reached through one of these traits.

use async_trait::async_trait;
use guarded_query_core::{AuthorizationContext, SchemaSnapshot, Secret, StoredConnection};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;

/// Decrypts stored secrets on demand
///
/// Called once per pool creation. Implementations must never log plaintext.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Decrypt a stored secret into a connection password
    async fn decrypt(&self, secret: &str) -> Result<Secret>;
}

/// Last observed schema per database
#[async_trait]
pub trait SchemaCache: Send + Sync {
    /// Cached schema, or `None` when the database has never been crawled
    async fn get_schema(&self, database_id: &str) -> Result<Option<SchemaSnapshot>>;
}

/// Table grants, masked columns and row caps per database
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Tables the caller may read
    async fn get_allowed_tables(&self, database_id: &str) -> Result<BTreeSet<String>>;

    /// Columns that must never be referenced, per table
    async fn get_masked_columns(&self, database_id: &str) -> Result<BTreeMap<String, BTreeSet<String>>>;

    /// Row caps per table
    async fn get_row_limits(&self, database_id: &str) -> Result<BTreeMap<String, u32>> {
        let _ = database_id;
        Ok(BTreeMap::new())
    }

    /// Fresh authorization snapshot for one request
    async fn authorization_context(&self, database_id: &str) -> Result<AuthorizationContext> {
        let mut context = AuthorizationContext::new(self.get_allowed_tables(database_id).await?);
        for (table, columns) in self.get_masked_columns(database_id).await? {
            context = context.with_masked(&table, columns);
        }
        for (table, limit) in self.get_row_limits(database_id).await? {
            context = context.with_row_limit(&table, limit);
        }
        Ok(context)
    }
}

/// Resolves database ids to connection details
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Connection details, or `None` for an unknown database
    async fn get_connection(&self, database_id: &str) -> Result<Option<StoredConnection>>;
}
