//! Connection descriptors for external databases
//!
//! A `StoredConnection` is what the directory knows about a database: the password
//! is still an opaque secret. A `ConnectionDescriptor` carries the decrypted password
//! and only lives as long as it takes to build a pool.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// SQL dialect spoken by an external database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL wire protocol and SQL dialect
    #[default]
    Postgres,
}

impl Dialect {
    /// Get the dialect tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
        }
    }
}

/// A plaintext secret that never appears in logs or debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a plaintext value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("Secret(***)")
    }
}

/// Connection details as held by the connection directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConnection {
    /// Host name or address
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name on the server
    pub database: String,

    /// Login role
    pub username: String,

    /// Encrypted or indirect password, resolved through a credential vault
    pub password_secret: String,

    /// Whether to require TLS
    #[serde(default)]
    pub tls: bool,

    /// SQL dialect
    #[serde(default)]
    pub dialect: Dialect,
}

fn default_port() -> u16 {
    5432
}

impl StoredConnection {
    /// Build a descriptor from this entry and a decrypted password
    pub fn into_descriptor(self, password: Secret) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            password,
            tls: self.tls,
            dialect: self.dialect,
        }
    }
}

/// Everything needed to open connections to an external database
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Host name or address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Database name on the server
    pub database: String,

    /// Login role
    pub username: String,

    /// Decrypted password
    pub password: Secret,

    /// Whether to require TLS
    pub tls: bool,

    /// SQL dialect
    pub dialect: Dialect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");

        let stored = StoredConnection {
            host: "db.internal".to_string(),
            port: 5432,
            database: "shop".to_string(),
            username: "reader".to_string(),
            password_secret: "env:SHOP_PASSWORD".to_string(),
            tls: true,
            dialect: Dialect::Postgres,
        };
        let descriptor = stored.into_descriptor(secret);
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("db.internal"));
    }

    #[test]
    fn test_stored_connection_defaults() {
        let stored: StoredConnection = serde_json::from_str(
            r#"{"host":"localhost","database":"app","username":"ro","password_secret":"plain:x"}"#,
        )
        .unwrap();
        assert_eq!(stored.port, 5432);
        assert!(!stored.tls);
        assert_eq!(stored.dialect.as_str(), "postgres");
    }
}
