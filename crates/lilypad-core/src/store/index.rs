// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Declared secondary indexes over the document store.
//!
//! Every index is a precomputed sorted mapping from a composite key tuple to
//! a document id. Backends maintain the rows on every write from the
//! extractors declared in [`registry`]; queries are pure range scans, so a
//! listing never inspects documents outside its bounds.

use chrono::SecondsFormat;

use super::RawDocument;

/// One component of a composite index key.
///
/// The ordering is total and mirrors the collation the bound-construction
/// logic relies on: `Min` sorts below every real value, `Max` above, and
/// integers below strings. String components must not contain ASCII control
/// characters (they never do here: slugs, status buckets, RFC 3339 dates).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    /// Sorts lower than any real key component.
    Min,
    /// Integer component (status buckets).
    Int(i64),
    /// String component (names, projects, timestamps).
    Str(String),
    /// Sorts higher than any real key component.
    Max,
}

impl IndexKey {
    /// Build a string component.
    pub fn str(value: impl Into<String>) -> Self {
        IndexKey::Str(value.into())
    }
}

/// Document-id lower sentinel used when a bound carries no resumption id.
pub const DOC_ID_MIN: &str = "";

/// Document-id upper sentinel; sorts above any real document id.
pub const DOC_ID_MAX: &str = "\u{10FFFF}";

/// A bounded range scan over one index.
///
/// `lower`/`upper` are always the collation-order endpoints regardless of
/// direction; `descending` only flips the visit order. Both bounds are
/// inclusive, with document id as the final tie-breaker.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Index name from [`registry`].
    pub index: &'static str,
    /// Inclusive lower bound key.
    pub lower_key: Vec<IndexKey>,
    /// Document id paired with the lower bound key.
    pub lower_doc_id: String,
    /// Inclusive upper bound key.
    pub upper_key: Vec<IndexKey>,
    /// Document id paired with the upper bound key.
    pub upper_doc_id: String,
    /// Visit rows in reverse collation order.
    pub descending: bool,
    /// Rows to drop before collecting the page.
    pub skip: usize,
    /// Maximum rows to return (`None` = unbounded).
    pub limit: Option<usize>,
}

/// Declaration of one secondary index.
pub struct IndexDef {
    /// Unique index name.
    pub name: &'static str,
    /// Document kind this index covers.
    pub kind: &'static str,
    /// Key extractor; `None` excludes the document from the index.
    pub keys: fn(&RawDocument) -> Option<Vec<IndexKey>>,
}

/// Map an invocation status string to its index bucket.
///
/// Terminal statuses collapse to 0 so that "active" versus "inactive"
/// filters become a single numeric range instead of a status enumeration;
/// pending is 1 and the scheduler-visible statuses (initializing, running)
/// are 2.
pub fn status_bucket(status: &str) -> Option<i64> {
    match status {
        "completed" | "failed" => Some(0),
        "pending" => Some(1),
        "initializing" | "running" => Some(2),
        _ => None,
    }
}

/// Fixed-width sortable timestamp key (RFC 3339, milliseconds, UTC).
pub fn timestamp_key(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn body_str<'a>(doc: &'a RawDocument, field: &str) -> Option<&'a str> {
    doc.body.get(field).and_then(|v| v.as_str())
}

fn functions_by_name(doc: &RawDocument) -> Option<Vec<IndexKey>> {
    Some(vec![IndexKey::str(body_str(doc, "name")?)])
}

fn functions_by_project(doc: &RawDocument) -> Option<Vec<IndexKey>> {
    Some(vec![
        IndexKey::str(body_str(doc, "project")?),
        IndexKey::str(body_str(doc, "name")?),
    ])
}

fn invocations_by_status(doc: &RawDocument) -> Option<Vec<IndexKey>> {
    Some(vec![
        IndexKey::Int(status_bucket(body_str(doc, "status")?)?),
        IndexKey::str(timestamp_key(&doc.created_at)),
    ])
}

fn invocations_by_function(doc: &RawDocument) -> Option<Vec<IndexKey>> {
    Some(vec![
        IndexKey::str(body_str(doc, "functionName")?),
        IndexKey::Int(status_bucket(body_str(doc, "status")?)?),
        IndexKey::str(timestamp_key(&doc.created_at)),
    ])
}

fn invocations_by_project(doc: &RawDocument) -> Option<Vec<IndexKey>> {
    Some(vec![
        IndexKey::str(body_str(doc, "project")?),
        IndexKey::Int(status_bucket(body_str(doc, "status")?)?),
        IndexKey::str(timestamp_key(&doc.created_at)),
    ])
}

/// Index names, fixed at compile time.
pub mod names {
    /// Functions by `[name]`.
    pub const FUNCTIONS_BY_NAME: &str = "functions_by_name";
    /// Functions by `[project, name]`.
    pub const FUNCTIONS_BY_PROJECT: &str = "functions_by_project";
    /// Invocations by `[statusBucket, createdAt]`.
    pub const INVOCATIONS_BY_STATUS: &str = "invocations_by_status";
    /// Invocations by `[functionName, statusBucket, createdAt]`.
    pub const INVOCATIONS_BY_FUNCTION: &str = "invocations_by_function";
    /// Invocations by `[project, statusBucket, createdAt]`.
    pub const INVOCATIONS_BY_PROJECT: &str = "invocations_by_project";
}

static REGISTRY: &[IndexDef] = &[
    IndexDef {
        name: names::FUNCTIONS_BY_NAME,
        kind: "function",
        keys: functions_by_name,
    },
    IndexDef {
        name: names::FUNCTIONS_BY_PROJECT,
        kind: "function",
        keys: functions_by_project,
    },
    IndexDef {
        name: names::INVOCATIONS_BY_STATUS,
        kind: "invocation",
        keys: invocations_by_status,
    },
    IndexDef {
        name: names::INVOCATIONS_BY_FUNCTION,
        kind: "invocation",
        keys: invocations_by_function,
    },
    IndexDef {
        name: names::INVOCATIONS_BY_PROJECT,
        kind: "invocation",
        keys: invocations_by_project,
    },
];

/// All declared indexes.
pub fn registry() -> &'static [IndexDef] {
    REGISTRY
}

/// Declared indexes covering one document kind.
pub fn for_kind(kind: &str) -> impl Iterator<Item = &'static IndexDef> {
    REGISTRY.iter().filter(move |def| def.kind == kind)
}
