// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document persistence with revision-based optimistic concurrency.
//!
//! This module defines the storage abstraction and backend implementations.
//! Entities are stored as JSON documents inside an envelope carrying the
//! revision counter, the schema version, and the creation/update timestamps.
//! Every write must present the revision it read; the backend rejects writes
//! against a stale revision, which is the only concurrency control in the
//! system. Binary payloads (trigger inputs, log pages) live as named
//! attachments next to the owning document so reading or listing document
//! bodies never pays for embedded binary content.

pub mod index;
pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryBackend;
pub use self::sqlite::SqliteBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CoreError, Result};

use self::index::QuerySpec;

/// Envelope bookkeeping shared by every stored entity.
///
/// Not serialized into the document body; the store copies it from the
/// backend envelope on read and back on write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocMeta {
    /// Revision presented on the next write. Zero for never-stored values.
    pub rev: i64,
    /// Set once when the document is first created.
    pub created_at: Option<DateTime<Utc>>,
    /// Refreshed on every effective write.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A stored document in envelope form.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Document kind (storage namespace).
    pub kind: String,
    /// Document id, unique per kind.
    pub id: String,
    /// Current revision counter.
    pub rev: i64,
    /// Schema version the body was written with.
    pub schema_version: i64,
    /// The serialized entity.
    pub body: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-write timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A named binary blob owned by a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Attachment name, unique per document.
    pub name: String,
    /// MIME type recorded at write time.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

/// A persistable entity kind.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Storage namespace for this kind.
    const KIND: &'static str;

    /// Newest schema version this build reads and writes.
    const SCHEMA_VERSION: i64 = 0;

    /// The document id this value is stored under.
    fn doc_id(&self) -> String;

    /// Envelope bookkeeping.
    fn meta(&self) -> &DocMeta;

    /// Envelope bookkeeping, mutable.
    fn meta_mut(&mut self) -> &mut DocMeta;

    /// Apply the single migration step from `version` to `version + 1`.
    ///
    /// Called on read for documents stored with an older schema version,
    /// once per missing step, oldest first. The updated version is persisted
    /// on the next successful write; there is no bulk rewrite pass.
    fn migrate(version: i64, body: serde_json::Value) -> Result<serde_json::Value> {
        let _ = body;
        Err(CoreError::MigrationFailure {
            kind: Self::KIND,
            stored: version,
            supported: Self::SCHEMA_VERSION,
        })
    }
}

/// Outcome of an update transform.
///
/// `Unchanged` performs zero writes; `Replace` persists the new value under
/// the revision the caller read.
#[derive(Debug, Clone)]
pub enum Mutation<E> {
    /// Keep the stored value as-is.
    Unchanged,
    /// Persist this value.
    Replace(E),
}

/// Raw storage operations implemented by each backend.
///
/// Backends own index-row maintenance: every insert/replace/remove refreshes
/// the rows of all registered indexes covering the document's kind, in the
/// same atomic step as the revision check.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch one document.
    async fn fetch(&self, kind: &str, id: &str) -> Result<Option<RawDocument>>;

    /// Fetch every document of a kind, ordered by id.
    async fn fetch_all(&self, kind: &str) -> Result<Vec<RawDocument>>;

    /// Insert a new document; `Conflict` when the id already exists.
    /// Returns the issued revision.
    async fn insert(&self, doc: RawDocument) -> Result<i64>;

    /// Replace an existing document iff its stored revision equals
    /// `expect_rev`; `Conflict` otherwise. Returns the new revision.
    async fn replace(&self, expect_rev: i64, doc: RawDocument) -> Result<i64>;

    /// Remove a document iff its stored revision equals `expect_rev`.
    /// Returns false when the document is already absent; `Conflict` when it
    /// exists under a different revision. Attachments are removed with it.
    async fn remove(&self, kind: &str, id: &str, expect_rev: i64) -> Result<bool>;

    /// Range scan over a declared index.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<RawDocument>>;

    /// Write (or overwrite) a named attachment.
    async fn write_attachment(&self, kind: &str, id: &str, attachment: Attachment) -> Result<()>;

    /// Read a named attachment.
    async fn read_attachment(&self, kind: &str, id: &str, name: &str)
    -> Result<Option<Attachment>>;

    /// Delete a named attachment if present.
    async fn delete_attachment(&self, kind: &str, id: &str, name: &str) -> Result<()>;
}

/// Typed document store over a pluggable [`Backend`].
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn Backend>,
}

impl DocumentStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Find a document by id, applying pending schema migrations on read.
    pub async fn find<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        match self.backend.fetch(E::KIND, id).await? {
            Some(raw) => Ok(Some(hydrate::<E>(raw)?)),
            None => Ok(None),
        }
    }

    /// Find a document by id, failing with `NotFound` when absent.
    pub async fn get<E: Entity>(&self, id: &str) -> Result<E> {
        self.find(id).await?.ok_or_else(|| CoreError::NotFound {
            kind: E::KIND.to_string(),
            id: id.to_string(),
        })
    }

    /// Create a new document with a freshly issued revision.
    ///
    /// `createdAt` is set once (an explicit value survives); `updatedAt`
    /// defaults to `createdAt`.
    pub async fn create<E: Entity>(&self, mut value: E) -> Result<E> {
        let now = Utc::now();
        {
            let meta = value.meta_mut();
            if meta.created_at.is_none() {
                meta.created_at = Some(meta.updated_at.unwrap_or(now));
            }
            if meta.updated_at.is_none() {
                meta.updated_at = meta.created_at;
            }
        }
        let raw = dehydrate(&value)?;
        let rev = self.backend.insert(raw).await?;
        value.meta_mut().rev = rev;
        Ok(value)
    }

    /// Update a document through a transform of its last-known value.
    ///
    /// The transform returns [`Mutation::Unchanged`] to perform zero writes
    /// or [`Mutation::Replace`] to persist a new value under the revision of
    /// `existing`. A stale revision fails with `Conflict`; the caller must
    /// re-read and retry, the store never retries on its own.
    pub async fn update<E, F>(&self, existing: &E, transform: F) -> Result<E>
    where
        E: Entity,
        F: FnOnce(E) -> Result<Mutation<E>>,
    {
        match transform(existing.clone())? {
            Mutation::Unchanged => Ok(existing.clone()),
            Mutation::Replace(mut next) => {
                let id = existing.doc_id();
                if next.doc_id() != id {
                    return Err(CoreError::Validation {
                        field: "id".to_string(),
                        message: "update transform must not change the document id".to_string(),
                    });
                }
                {
                    let meta = next.meta_mut();
                    meta.created_at = existing.meta().created_at;
                    // Refresh updatedAt unless the transform stamped it itself.
                    if meta.updated_at == existing.meta().updated_at {
                        meta.updated_at = Some(Utc::now());
                    }
                }
                let raw = dehydrate(&next)?;
                let rev = self.backend.replace(existing.meta().rev, raw).await?;
                next.meta_mut().rev = rev;
                Ok(next)
            }
        }
    }

    /// Ensure-then-update: supply a default via `factory` when no document
    /// exists, then apply `transform` and persist.
    ///
    /// Returns the stored value and whether the document was created.
    pub async fn upsert<E, Fac, F>(&self, id: &str, factory: Fac, transform: F) -> Result<(E, bool)>
    where
        E: Entity,
        Fac: FnOnce() -> E,
        F: FnOnce(E) -> Result<Mutation<E>>,
    {
        match self.find::<E>(id).await? {
            Some(existing) => {
                let updated = self.update(&existing, transform).await?;
                Ok((updated, false))
            }
            None => {
                let seed = factory();
                let value = match transform(seed.clone())? {
                    Mutation::Unchanged => seed,
                    Mutation::Replace(next) => next,
                };
                let created = self.create(value).await?;
                Ok((created, true))
            }
        }
    }

    /// Delete a document under the revision last read.
    ///
    /// Returns false when already absent; `Conflict` when a concurrent
    /// writer moved the revision.
    pub async fn delete<E: Entity>(&self, existing: &E) -> Result<bool> {
        self.backend
            .remove(E::KIND, &existing.doc_id(), existing.meta().rev)
            .await
    }

    /// Every document of a kind (grants rebuild scans).
    pub async fn scan<E: Entity>(&self) -> Result<Vec<E>> {
        let raws = self.backend.fetch_all(E::KIND).await?;
        raws.into_iter().map(hydrate::<E>).collect()
    }

    /// Range scan over a declared index, hydrating each row's document.
    pub async fn query<E: Entity>(&self, spec: &QuerySpec) -> Result<Vec<E>> {
        let raws = self.backend.query(spec).await?;
        raws.into_iter().map(hydrate::<E>).collect()
    }

    /// Write (or overwrite) a named attachment on a document.
    pub async fn write_attachment<E: Entity>(&self, id: &str, attachment: Attachment) -> Result<()> {
        self.backend.write_attachment(E::KIND, id, attachment).await
    }

    /// Read a named attachment from a document.
    pub async fn read_attachment<E: Entity>(
        &self,
        id: &str,
        name: &str,
    ) -> Result<Option<Attachment>> {
        self.backend.read_attachment(E::KIND, id, name).await
    }

    /// Delete a named attachment if present.
    pub async fn delete_attachment<E: Entity>(&self, id: &str, name: &str) -> Result<()> {
        self.backend.delete_attachment(E::KIND, id, name).await
    }
}

/// Deserialize an envelope into an entity, running pending migration steps.
fn hydrate<E: Entity>(raw: RawDocument) -> Result<E> {
    let mut version = raw.schema_version;
    if version > E::SCHEMA_VERSION {
        return Err(CoreError::MigrationFailure {
            kind: E::KIND,
            stored: version,
            supported: E::SCHEMA_VERSION,
        });
    }
    let mut body = raw.body;
    while version < E::SCHEMA_VERSION {
        body = E::migrate(version, body)?;
        version += 1;
    }
    let mut value: E = serde_json::from_value(body)?;
    *value.meta_mut() = DocMeta {
        rev: raw.rev,
        created_at: Some(raw.created_at),
        updated_at: Some(raw.updated_at),
    };
    Ok(value)
}

/// Serialize an entity into envelope form for the backend.
fn dehydrate<E: Entity>(value: &E) -> Result<RawDocument> {
    let now = Utc::now();
    Ok(RawDocument {
        kind: E::KIND.to_string(),
        id: value.doc_id(),
        rev: value.meta().rev,
        schema_version: E::SCHEMA_VERSION,
        body: serde_json::to_value(value)?,
        created_at: value.meta().created_at.unwrap_or(now),
        updated_at: value.meta().updated_at.unwrap_or(now),
    })
}
