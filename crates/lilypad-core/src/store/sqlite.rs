// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed storage backend.
//!
//! Documents live in a `documents` table keyed by (kind, id); secondary-index
//! rows are materialized into `index_rows` with a packed sort key whose byte
//! order equals the logical [`IndexKey`] tuple order, so every listing is a
//! single range scan. Writes refresh the index rows in the same transaction
//! as the revision check.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{CoreError, Result};

use super::index::{self, IndexKey, QuerySpec};
use super::{Attachment, Backend, RawDocument};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Separator between packed key components. Sorts below every character that
/// may appear inside a component, so prefix keys order before their
/// extensions exactly like the tuple comparison does.
const COMPONENT_SEP: char = '\u{1f}';

/// Pack a composite key into a single string whose byte order matches the
/// [`IndexKey`] tuple order. Integers are offset into `u64` space and
/// zero-padded to fixed width; variant tags order Min < Int < Str < Max.
fn pack_key(keys: &[IndexKey]) -> String {
    let mut out = String::new();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(COMPONENT_SEP);
        }
        match key {
            IndexKey::Min => out.push('0'),
            IndexKey::Int(v) => {
                out.push('1');
                out.push_str(&format!("{:020}", (*v as i128 - i64::MIN as i128) as u128));
            }
            IndexKey::Str(s) => {
                out.push('2');
                out.push_str(s);
            }
            IndexKey::Max => out.push('3'),
        }
    }
    out
}

/// SQLite-backed [`Backend`] implementation.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Create a backend from an existing pool. The caller is responsible for
    /// having run the migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a backend from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::from_url(&url).await
    }

    /// Create and initialize a backend from a connection URL
    /// (e.g. `sqlite:.data/lilypad.db?mode=rwc`).
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", url, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| CoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }
}

fn row_to_doc(row: &sqlx::sqlite::SqliteRow) -> Result<RawDocument> {
    let body: String = row.try_get("body")?;
    Ok(RawDocument {
        kind: row.try_get("kind")?,
        id: row.try_get("id")?,
        rev: row.try_get("rev")?,
        schema_version: row.try_get("schema_version")?,
        body: serde_json::from_str(&body)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Refresh the index rows of one document inside an open transaction.
async fn reindex(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc: &RawDocument,
) -> Result<()> {
    for def in index::for_kind(&doc.kind) {
        sqlx::query("DELETE FROM index_rows WHERE index_name = ? AND doc_id = ?")
            .bind(def.name)
            .bind(&doc.id)
            .execute(&mut **tx)
            .await?;

        if let Some(keys) = (def.keys)(doc) {
            sqlx::query("INSERT INTO index_rows (index_name, sort_key, doc_id) VALUES (?, ?, ?)")
                .bind(def.name)
                .bind(pack_key(&keys))
                .bind(&doc.id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn fetch(&self, kind: &str, id: &str) -> Result<Option<RawDocument>> {
        let row = sqlx::query(
            r#"
            SELECT kind, id, rev, schema_version, body, created_at, updated_at
            FROM documents
            WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_doc).transpose()
    }

    async fn fetch_all(&self, kind: &str) -> Result<Vec<RawDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, id, rev, schema_version, body, created_at, updated_at
            FROM documents
            WHERE kind = ?
            ORDER BY id
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_doc).collect()
    }

    async fn insert(&self, doc: RawDocument) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (kind, id, rev, schema_version, body, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.kind)
        .bind(&doc.id)
        .bind(doc.schema_version)
        .bind(doc.body.to_string())
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = result {
            if err
                .as_database_error()
                .is_some_and(|e| e.is_unique_violation())
            {
                return Err(CoreError::Conflict {
                    kind: doc.kind,
                    id: doc.id,
                });
            }
            return Err(err.into());
        }

        let mut stored = doc;
        stored.rev = 1;
        reindex(&mut tx, &stored).await?;
        tx.commit().await?;
        Ok(1)
    }

    async fn replace(&self, expect_rev: i64, doc: RawDocument) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET rev = rev + 1, schema_version = ?, body = ?, updated_at = ?
            WHERE kind = ? AND id = ? AND rev = ?
            "#,
        )
        .bind(doc.schema_version)
        .bind(doc.body.to_string())
        .bind(doc.updated_at)
        .bind(&doc.kind)
        .bind(&doc.id)
        .bind(expect_rev)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict {
                kind: doc.kind,
                id: doc.id,
            });
        }

        let mut stored = doc;
        stored.rev = expect_rev + 1;
        reindex(&mut tx, &stored).await?;
        tx.commit().await?;
        Ok(stored.rev)
    }

    async fn remove(&self, kind: &str, id: &str, expect_rev: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let stored_rev: Option<i64> =
            sqlx::query_scalar("SELECT rev FROM documents WHERE kind = ? AND id = ?")
                .bind(kind)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        match stored_rev {
            None => return Ok(false),
            Some(rev) if rev != expect_rev => {
                return Err(CoreError::Conflict {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM documents WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM attachments WHERE kind = ? AND doc_id = ?")
            .bind(kind)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for def in index::for_kind(kind) {
            sqlx::query("DELETE FROM index_rows WHERE index_name = ? AND doc_id = ?")
                .bind(def.name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<RawDocument>> {
        let def = index::registry()
            .iter()
            .find(|def| def.name == spec.index)
            .ok_or_else(|| CoreError::Database {
                operation: "query".to_string(),
                details: format!("unknown index '{}'", spec.index),
            })?;

        let order = if spec.descending {
            "ORDER BY r.sort_key DESC, r.doc_id DESC"
        } else {
            "ORDER BY r.sort_key ASC, r.doc_id ASC"
        };
        let sql = format!(
            r#"
            SELECT d.kind, d.id, d.rev, d.schema_version, d.body, d.created_at, d.updated_at
            FROM index_rows r
            JOIN documents d ON d.kind = ? AND d.id = r.doc_id
            WHERE r.index_name = ?
              AND (r.sort_key, r.doc_id) >= (?, ?)
              AND (r.sort_key, r.doc_id) <= (?, ?)
            {order}
            LIMIT ? OFFSET ?
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(def.kind)
            .bind(spec.index)
            .bind(pack_key(&spec.lower_key))
            .bind(&spec.lower_doc_id)
            .bind(pack_key(&spec.upper_key))
            .bind(&spec.upper_doc_id)
            .bind(spec.limit.map(|l| l as i64).unwrap_or(-1))
            .bind(spec.skip as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_doc).collect()
    }

    async fn write_attachment(&self, kind: &str, id: &str, attachment: Attachment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM documents WHERE kind = ? AND id = ?")
                .bind(kind)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(CoreError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO attachments (kind, doc_id, name, content_type, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (kind, doc_id, name)
            DO UPDATE SET content_type = excluded.content_type, data = excluded.data
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(&attachment.name)
        .bind(&attachment.content_type)
        .bind(&attachment.data)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn read_attachment(
        &self,
        kind: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<Attachment>> {
        let row = sqlx::query(
            r#"
            SELECT name, content_type, data
            FROM attachments
            WHERE kind = ? AND doc_id = ? AND name = ?
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Attachment {
                name: row.try_get("name")?,
                content_type: row.try_get("content_type")?,
                data: row.try_get("data")?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_attachment(&self, kind: &str, id: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM attachments WHERE kind = ? AND doc_id = ? AND name = ?")
            .bind(kind)
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
