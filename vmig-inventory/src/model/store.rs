//! SQLite-backed inventory store.
//!
//! One database file per provider. The store exposes transactional
//! CRUD over the per-kind record tables plus read-side lookups for the
//! query surface. Optimistic concurrency: updates carry the expected
//! prior revision and fail with [`StoreError::Conflict`] when the row
//! moved underneath the writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Transaction};
use thiserror::Error;
use tracing::debug;

use super::{Record, Ref, ResourceKind};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency failure or a competing writer.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            sqlx::Error::Database(db) => {
                let message = db.message();
                if message.contains("UNIQUE constraint")
                    || message.contains("database is locked")
                    || message.contains("database table is locked")
                {
                    StoreError::Conflict(message.to_string())
                } else {
                    StoreError::Internal(err.to_string())
                }
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Per-provider inventory database.
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open the database file, creating it when missing. With `reset`
    /// the record tables are dropped and recreated for a clean
    /// bootstrap.
    pub async fn open(path: &Path, reset: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(250));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
        };
        store.migrate(reset).await?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn migrate(&self, reset: bool) -> Result<()> {
        for kind in ResourceKind::ALL {
            if reset {
                sqlx::query(&format!("DROP TABLE IF EXISTS {}", kind.table()))
                    .execute(&self.pool)
                    .await?;
            }
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    pk TEXT PRIMARY KEY,
                    id TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL DEFAULT '',
                    parent_kind TEXT,
                    parent_id TEXT,
                    revision INTEGER NOT NULL DEFAULT 0,
                    object TEXT NOT NULL DEFAULT '{{}}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                kind.table()
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Close the store. `purge` is an advisory hint only; the store
    /// never deletes its own file.
    pub async fn close(&self, purge: bool) {
        if purge {
            debug!(path = %self.path.display(), "close with purge hint");
        }
        self.pool.close().await;
    }

    /// Begin a transaction.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(Tx {
            inner: self.pool.begin().await?,
        })
    }

    /// Read a record by primary key.
    pub async fn get(&self, kind: ResourceKind, pk: &str) -> Result<Record> {
        let row = sqlx::query(&format!(
            "SELECT pk, id, name, parent_kind, parent_id, revision, object FROM {} WHERE pk = ?",
            kind.table()
        ))
        .bind(pk)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row_to_record(&row)),
            None => Err(StoreError::NotFound(format!("{}/{}", kind.table(), pk))),
        }
    }

    /// List records of a kind, ordered by primary key, optionally
    /// filtered by name.
    pub async fn list(&self, kind: ResourceKind, name: Option<&str>) -> Result<Vec<Record>> {
        let rows = match name {
            Some(name) => {
                sqlx::query(&format!(
                    "SELECT pk, id, name, parent_kind, parent_id, revision, object \
                     FROM {} WHERE name = ? ORDER BY pk",
                    kind.table()
                ))
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT pk, id, name, parent_kind, parent_id, revision, object \
                     FROM {} ORDER BY pk",
                    kind.table()
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(row_to_record).collect())
    }
}

/// A store transaction. Dropped without commit, it rolls back.
pub struct Tx {
    inner: Transaction<'static, sqlx::Sqlite>,
}

impl Tx {
    pub async fn insert(&mut self, kind: ResourceKind, record: &Record) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(&format!(
            "INSERT INTO {} (pk, id, name, parent_kind, parent_id, revision, object, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            kind.table()
        ))
        .bind(&record.pk)
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.parent.as_ref().map(|p| p.kind.table()))
        .bind(record.parent.as_ref().map(|p| p.id.as_str()))
        .bind(record.revision)
        .bind(&record.object)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.inner)
        .await?;

        Ok(())
    }

    /// Update a record. The record carries its new revision; the row
    /// must still hold the prior one or the update fails with
    /// `Conflict`.
    pub async fn update(&mut self, kind: ResourceKind, record: &Record) -> Result<()> {
        let expected = record.revision - 1;
        let result = sqlx::query(&format!(
            "UPDATE {} SET name = ?, parent_kind = ?, parent_id = ?, revision = ?, object = ?, updated_at = ? \
             WHERE pk = ? AND revision = ?",
            kind.table()
        ))
        .bind(&record.name)
        .bind(record.parent.as_ref().map(|p| p.kind.table()))
        .bind(record.parent.as_ref().map(|p| p.id.as_str()))
        .bind(record.revision)
        .bind(&record.object)
        .bind(Utc::now().to_rfc3339())
        .bind(&record.pk)
        .bind(expected)
        .execute(&mut *self.inner)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query(&format!(
                "SELECT 1 FROM {} WHERE pk = ?",
                kind.table()
            ))
            .bind(&record.pk)
            .fetch_optional(&mut *self.inner)
            .await?;
            return match exists {
                Some(_) => Err(StoreError::Conflict(format!(
                    "{}/{}: revision {} moved",
                    kind.table(),
                    record.id,
                    expected
                ))),
                None => Err(StoreError::NotFound(format!(
                    "{}/{}",
                    kind.table(),
                    record.id
                ))),
            };
        }

        Ok(())
    }

    pub async fn delete(&mut self, kind: ResourceKind, pk: &str) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE pk = ?", kind.table()))
            .bind(pk)
            .execute(&mut *self.inner)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{}/{}", kind.table(), pk)));
        }

        Ok(())
    }

    pub async fn get(&mut self, kind: ResourceKind, pk: &str) -> Result<Record> {
        let row = sqlx::query(&format!(
            "SELECT pk, id, name, parent_kind, parent_id, revision, object FROM {} WHERE pk = ?",
            kind.table()
        ))
        .bind(pk)
        .fetch_optional(&mut *self.inner)
        .await?;

        match row {
            Some(row) => Ok(row_to_record(&row)),
            None => Err(StoreError::NotFound(format!("{}/{}", kind.table(), pk))),
        }
    }

    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Record {
    let parent_kind: Option<String> = row.get("parent_kind");
    let parent_id: Option<String> = row.get("parent_id");
    let parent = match (parent_kind, parent_id) {
        (Some(kind), Some(id)) => ResourceKind::from_collection(&kind).map(|kind| Ref { kind, id }),
        _ => None,
    };

    Record {
        pk: row.get("pk"),
        id: row.get("id"),
        name: row.get("name"),
        parent,
        revision: row.get("revision"),
        object: row.get("object"),
    }
}
