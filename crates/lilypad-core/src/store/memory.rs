// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory storage backend.
//!
//! Keeps documents, attachments, and index rows in process memory behind a
//! `tokio::sync::RwLock`. Index rows live in ordered sets, so range scans
//! share the exact collation semantics of the SQLite backend. Used by tests
//! and embedded scenarios.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CoreError, Result};

use super::index::{self, IndexKey, QuerySpec};
use super::{Attachment, Backend, RawDocument};

type IndexRow = (Vec<IndexKey>, String);

#[derive(Default)]
struct Inner {
    /// (kind, id) -> document
    docs: HashMap<(String, String), RawDocument>,
    /// (kind, id, name) -> attachment
    attachments: HashMap<(String, String, String), Attachment>,
    /// index name -> ordered (key, doc id) rows
    indexes: HashMap<&'static str, BTreeSet<IndexRow>>,
}

impl Inner {
    fn drop_index_rows(&mut self, doc: &RawDocument) {
        for def in index::for_kind(&doc.kind) {
            if let Some(keys) = (def.keys)(doc)
                && let Some(set) = self.indexes.get_mut(def.name)
            {
                set.remove(&(keys, doc.id.clone()));
            }
        }
    }

    fn add_index_rows(&mut self, doc: &RawDocument) {
        for def in index::for_kind(&doc.kind) {
            if let Some(keys) = (def.keys)(doc) {
                self.indexes
                    .entry(def.name)
                    .or_default()
                    .insert((keys, doc.id.clone()));
            }
        }
    }
}

/// In-memory [`Backend`] implementation.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch(&self, kind: &str, id: &str) -> Result<Option<RawDocument>> {
        let inner = self.inner.read().await;
        Ok(inner
            .docs
            .get(&(kind.to_string(), id.to_string()))
            .cloned())
    }

    async fn fetch_all(&self, kind: &str) -> Result<Vec<RawDocument>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<RawDocument> = inner
            .docs
            .values()
            .filter(|doc| doc.kind == kind)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn insert(&self, mut doc: RawDocument) -> Result<i64> {
        let mut inner = self.inner.write().await;
        let key = (doc.kind.clone(), doc.id.clone());
        if inner.docs.contains_key(&key) {
            return Err(CoreError::Conflict {
                kind: doc.kind,
                id: doc.id,
            });
        }
        doc.rev = 1;
        inner.add_index_rows(&doc);
        inner.docs.insert(key, doc);
        Ok(1)
    }

    async fn replace(&self, expect_rev: i64, doc: RawDocument) -> Result<i64> {
        let mut inner = self.inner.write().await;
        let key = (doc.kind.clone(), doc.id.clone());
        let old = match inner.docs.remove(&key) {
            Some(stored) if stored.rev == expect_rev => stored,
            Some(stored) => {
                // Put the winner back before reporting the stale write.
                inner.docs.insert(key, stored);
                return Err(CoreError::Conflict {
                    kind: doc.kind,
                    id: doc.id,
                });
            }
            None => {
                return Err(CoreError::Conflict {
                    kind: doc.kind,
                    id: doc.id,
                });
            }
        };
        inner.drop_index_rows(&old);
        let mut next = doc;
        next.rev = old.rev + 1;
        inner.add_index_rows(&next);
        let rev = next.rev;
        inner.docs.insert(key, next);
        Ok(rev)
    }

    async fn remove(&self, kind: &str, id: &str, expect_rev: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let key = (kind.to_string(), id.to_string());
        let old = match inner.docs.remove(&key) {
            Some(stored) if stored.rev == expect_rev => stored,
            Some(stored) => {
                inner.docs.insert(key, stored);
                return Err(CoreError::Conflict {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            }
            None => return Ok(false),
        };
        inner.drop_index_rows(&old);
        inner
            .attachments
            .retain(|(att_kind, att_id, _), _| !(att_kind == kind && att_id == id));
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

        let inner = self.inner.read().await;
        let lower: IndexRow = (spec.lower_key.clone(), spec.lower_doc_id.clone());
        let upper: IndexRow = (spec.upper_key.clone(), spec.upper_doc_id.clone());
        if lower > upper {
            return Ok(Vec::new());
        }

        let rows: Vec<&IndexRow> = match inner.indexes.get(spec.index) {
            Some(set) => {
                let range = set.range((Bound::Included(lower), Bound::Included(upper)));
                if spec.descending {
                    range.rev().collect()
                } else {
                    range.collect()
                }
            }
            None => Vec::new(),
        };

        let mut docs = Vec::new();
        for (_, doc_id) in rows
            .into_iter()
            .skip(spec.skip)
            .take(spec.limit.unwrap_or(usize::MAX))
        {
            if let Some(doc) = inner
                .docs
                .get(&(def.kind.to_string(), doc_id.clone()))
                .cloned()
            {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    async fn write_attachment(&self, kind: &str, id: &str, attachment: Attachment) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.docs.contains_key(&(kind.to_string(), id.to_string())) {
            return Err(CoreError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        inner.attachments.insert(
            (kind.to_string(), id.to_string(), attachment.name.clone()),
            attachment,
        );
        Ok(())
    }

    async fn read_attachment(
        &self,
        kind: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<Attachment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .attachments
            .get(&(kind.to_string(), id.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_attachment(&self, kind: &str, id: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .attachments
            .remove(&(kind.to_string(), id.to_string(), name.to_string()));
        Ok(())
    }
}
