//! `SQLite`-backed certificate metadata store.
//!
//! The pool is created once at startup and handed to the server state;
//! nothing in this crate holds a global connection. Domains are stored as
//! a JSON array string; `expiry_source` keeps the provenance tag so an
//! estimated expiry never masquerades as a parsed one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const SCHEMA_CERTIFICATES: &str = "
CREATE TABLE IF NOT EXISTS certificates (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  domains TEXT NOT NULL,
  created_at TEXT NOT NULL,
  expires_at TEXT,
  expiry_source TEXT,
  status TEXT NOT NULL,
  path_cert TEXT NOT NULL,
  path_key TEXT NOT NULL
)";

const SCHEMA_SETTINGS: &str = "
CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
)";

/// A certificate row as persisted
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CertificateRecord {
    pub id: i64,
    pub name: String,
    /// JSON array string, see [`CertificateRecord::domain_list`]
    pub domains: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    /// `parsed` or `fallback`; `NULL` when the expiry is unknown
    pub expiry_source: Option<String>,
    pub status: String,
    pub path_cert: String,
    pub path_key: String,
}

impl CertificateRecord {
    /// Decode the stored domains column
    #[must_use]
    pub fn domain_list(&self) -> Vec<String> {
        serde_json::from_str(&self.domains).unwrap_or_default()
    }
}

/// Fields for a new certificate row
#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub name: String,
    pub domains: Vec<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub expiry_source: Option<String>,
    pub status: String,
    pub path_cert: String,
    pub path_key: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // A single long-lived connection: an in-memory database exists per
        // connection, so the pool must never rotate it away.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(SCHEMA_CERTIFICATES)
            .execute(&self.pool)
            .await
            .context("failed to create certificates table")?;
        sqlx::query(SCHEMA_SETTINGS)
            .execute(&self.pool)
            .await
            .context("failed to create settings table")?;
        Ok(())
    }

    /// Close the pool; called on shutdown
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// All certificate rows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self) -> Result<Vec<CertificateRecord>> {
        sqlx::query_as::<_, CertificateRecord>("SELECT * FROM certificates ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list certificates")
    }

    /// A single certificate row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: i64) -> Result<Option<CertificateRecord>> {
        sqlx::query_as::<_, CertificateRecord>("SELECT * FROM certificates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to fetch certificate {id}"))
    }

    /// Insert a row and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the domains cannot be encoded or the insert
    /// fails.
    pub async fn insert(&self, cert: &NewCertificate) -> Result<i64> {
        let domains = serde_json::to_string(&cert.domains)
            .context("failed to encode certificate domains")?;

        let result = sqlx::query(
            "INSERT INTO certificates \
             (name, domains, created_at, expires_at, expiry_source, status, path_cert, path_key) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&cert.name)
        .bind(&domains)
        .bind(&cert.created_at)
        .bind(&cert.expires_at)
        .bind(&cert.expiry_source)
        .bind(&cert.status)
        .bind(&cert.path_cert)
        .bind(&cert.path_key)
        .execute(&self.pool)
        .await
        .context("failed to insert certificate")?;

        Ok(result.last_insert_rowid())
    }

    /// Update a row's expiry and its provenance tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_expiry(&self, id: i64, expires_at: &str, source: &str) -> Result<()> {
        sqlx::query("UPDATE certificates SET expires_at = ?, expiry_source = ? WHERE id = ?")
            .bind(expires_at)
            .bind(source)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update expiry for certificate {id}"))?;
        Ok(())
    }

    /// Delete a row; true when a row was actually removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM certificates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete certificate {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Read a settings value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("failed to read setting {key}"))?;
        Ok(row.map(|(value,)| value))
    }

    /// Write a settings value, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to write setting {key}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn sample(name: &str) -> NewCertificate {
        NewCertificate {
            name: name.to_string(),
            domains: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            expires_at: Some("2028-04-01T00:00:00.000Z".to_string()),
            expiry_source: Some("parsed".to_string()),
            status: "Valid".to_string(),
            path_cert: format!("/tmp/{name}.pem"),
            path_key: format!("/tmp/{name}-key.pem"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.insert(&sample("localhost")).await.unwrap();
        assert!(id > 0);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.name, "localhost");
        assert_eq!(record.expiry_source, Some("parsed".to_string()));
        assert_eq!(
            record.domain_list(),
            vec!["localhost".to_string(), "127.0.0.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ordered() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert(&sample("a")).await.unwrap();
        store.insert(&sample("b")).await.unwrap();

        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.first().map(|r| r.name.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn test_update_expiry() {
        let store = Store::open_in_memory().await.unwrap();
        let mut cert = sample("localhost");
        cert.expires_at = None;
        cert.expiry_source = None;
        let id = store.insert(&cert).await.unwrap();

        store
            .update_expiry(id, "2028-06-01T00:00:00.000Z", "parsed")
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(
            record.expires_at,
            Some("2028-06-01T00:00:00.000Z".to_string())
        );
        assert_eq!(record.expiry_source, Some("parsed".to_string()));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.insert(&sample("localhost")).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.setting("cert_path").await.unwrap().is_none());

        store.set_setting("cert_path", "/tmp/certs").await.unwrap();
        assert_eq!(
            store.setting("cert_path").await.unwrap(),
            Some("/tmp/certs".to_string())
        );

        store.set_setting("cert_path", "/srv/certs").await.unwrap();
        assert_eq!(
            store.setting("cert_path").await.unwrap(),
            Some("/srv/certs".to_string())
        );
    }
}
