// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract tests, run against both backends.

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::definition;
use futures::future::join_all;
use lilypad_core::function::{Function, create_function};
use lilypad_core::invocation::{Invocation, new_invocation};
use lilypad_core::store::index::{self, IndexKey, QuerySpec};
use lilypad_core::store::{
    Attachment, Backend, DocumentStore, MemoryBackend, Mutation, RawDocument, SqliteBackend,
};

fn test_function(name: &str) -> Function {
    create_function(definition(name), 10)
}

fn active_spec(function_name: &str, bucket: i64) -> QuerySpec {
    QuerySpec {
        index: index::names::INVOCATIONS_BY_FUNCTION,
        lower_key: vec![
            IndexKey::str(function_name),
            IndexKey::Int(bucket),
            IndexKey::Min,
        ],
        lower_doc_id: index::DOC_ID_MIN.to_string(),
        upper_key: vec![
            IndexKey::str(function_name),
            IndexKey::Int(bucket),
            IndexKey::Max,
        ],
        upper_doc_id: index::DOC_ID_MAX.to_string(),
        descending: false,
        skip: 0,
        limit: None,
    }
}

/// The full store contract, shared by both backend tests.
async fn exercise_store_contract(backend: Arc<dyn Backend>) {
    let store = DocumentStore::new(backend);

    // 1. Create assigns a revision; duplicate ids conflict
    let function = store
        .create(test_function("contract-fn"))
        .await
        .expect("Failed to create function");
    assert_eq!(function.meta.rev, 1);
    assert!(function.meta.created_at.is_some());

    let err = store
        .create(test_function("contract-fn"))
        .await
        .expect_err("Duplicate create must conflict");
    assert_eq!(err.error_code(), "CONFLICT");

    // 2. Update persists under the read revision and refreshes updatedAt
    let updated = store
        .update(&function, |mut f| {
            f.retries = 5;
            Ok(Mutation::Replace(f))
        })
        .await
        .expect("Failed to update function");
    assert_eq!(updated.meta.rev, 2);
    assert_eq!(updated.meta.created_at, function.meta.created_at);
    assert!(updated.meta.updated_at >= function.meta.updated_at);

    // 3. A stale revision loses
    let err = store
        .update(&function, |mut f| {
            f.retries = 9;
            Ok(Mutation::Replace(f))
        })
        .await
        .expect_err("Stale update must conflict");
    assert_eq!(err.error_code(), "CONFLICT");

    // 4. Unchanged performs no write
    let unchanged = store
        .update(&updated, |_| Ok(Mutation::<Function>::Unchanged))
        .await
        .expect("Unchanged update should succeed");
    assert_eq!(unchanged.meta.rev, 2);

    // 5. Index rows follow the document: a running invocation moves buckets
    //    when it is replaced with a terminal status
    let mut invocation = new_invocation(&updated, false);
    invocation.status = lilypad_core::invocation::InvocationStatus::Running;
    let invocation = store
        .create(invocation)
        .await
        .expect("Failed to create invocation");

    assert_eq!(
        store
            .query::<Invocation>(&active_spec("contract-fn", 2))
            .await
            .expect("Failed to query")
            .len(),
        1
    );

    let invocation = store
        .update(&invocation, |mut i| {
            i.status = lilypad_core::invocation::InvocationStatus::Completed;
            Ok(Mutation::Replace(i))
        })
        .await
        .expect("Failed to update invocation");
    assert!(
        store
            .query::<Invocation>(&active_spec("contract-fn", 2))
            .await
            .expect("Failed to query")
            .is_empty()
    );
    assert_eq!(
        store
            .query::<Invocation>(&active_spec("contract-fn", 0))
            .await
            .expect("Failed to query")
            .len(),
        1
    );

    // 6. Attachments live and die with the document
    store
        .write_attachment::<Invocation>(
            &invocation.ulid,
            Attachment {
                name: "payload".to_string(),
                content_type: "application/octet-stream".to_string(),
                data: vec![1, 2, 3],
            },
        )
        .await
        .expect("Failed to write attachment");
    let attachment = store
        .read_attachment::<Invocation>(&invocation.ulid, "payload")
        .await
        .expect("Failed to read attachment")
        .expect("Attachment should exist");
    assert_eq!(attachment.data, vec![1, 2, 3]);

    let err = store
        .write_attachment::<Invocation>(
            "missing-ulid",
            Attachment {
                name: "payload".to_string(),
                content_type: "application/octet-stream".to_string(),
                data: vec![],
            },
        )
        .await
        .expect_err("Attachment on a missing document must fail");
    assert_eq!(err.error_code(), "NOT_FOUND");

    assert!(
        store
            .delete(&invocation)
            .await
            .expect("Failed to delete invocation")
    );
    assert!(
        store
            .read_attachment::<Invocation>(&invocation.ulid, "payload")
            .await
            .expect("Failed to read attachment")
            .is_none()
    );

    // 7. Upsert reports creation
    let (_, created) = store
        .upsert::<Function, _, _>(
            "upserted-fn",
            || test_function("upserted-fn"),
            |f| Ok(Mutation::Replace(f)),
        )
        .await
        .expect("Failed to upsert");
    assert!(created);
    let (stored, created) = store
        .upsert::<Function, _, _>(
            "upserted-fn",
            || test_function("upserted-fn"),
            |mut f| {
                f.sequential = true;
                Ok(Mutation::Replace(f))
            },
        )
        .await
        .expect("Failed to upsert");
    assert!(!created);
    assert!(stored.sequential);
}

#[tokio::test]
async fn test_memory_backend_contract() {
    exercise_store_contract(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test]
async fn test_sqlite_backend_contract() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let backend = SqliteBackend::from_path(dir.path().join("store.db"))
        .await
        .expect("Failed to open SQLite backend");
    exercise_store_contract(Arc::new(backend)).await;
}

#[tokio::test]
async fn test_concurrent_writers_exactly_one_wins() {
    let store = DocumentStore::new(Arc::new(MemoryBackend::new()));
    store
        .create(test_function("contested-fn"))
        .await
        .expect("Failed to create function");

    // Two writers read the same snapshot and race their writes
    let a = store
        .get::<Function>("contested-fn")
        .await
        .expect("Failed to read");
    let b = store
        .get::<Function>("contested-fn")
        .await
        .expect("Failed to read");

    let store_a = store.clone();
    let store_b = store.clone();
    let results = join_all([
        tokio::spawn(async move {
            store_a
                .update(&a, |mut f| {
                    f.retries = 1;
                    Ok(Mutation::Replace(f))
                })
                .await
        }),
        tokio::spawn(async move {
            store_b
                .update(&b, |mut f| {
                    f.retries = 2;
                    Ok(Mutation::Replace(f))
                })
                .await
        }),
    ])
    .await;

    let outcomes: Vec<_> = results
        .into_iter()
        .map(|r| r.expect("Task panicked"))
        .collect();
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| {
            r.as_ref()
                .err()
                .is_some_and(|e| e.error_code() == "CONFLICT")
        })
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);

    // The winner's write is intact
    let stored = store
        .get::<Function>("contested-fn")
        .await
        .expect("Failed to read");
    assert!(stored.retries == 1 || stored.retries == 2);
    assert_eq!(stored.meta.rev, 2);
}

#[tokio::test]
async fn test_lazy_migration_on_read() {
    let backend = Arc::new(MemoryBackend::new());
    let store = DocumentStore::new(backend.clone());

    // 1. A v0 invocation document, written before logs and retries existed
    let now = Utc::now();
    backend
        .insert(RawDocument {
            kind: "invocation".to_string(),
            id: "01hxlegacy0000000000000000".to_string(),
            rev: 0,
            schema_version: 0,
            body: serde_json::json!({
                "ulid": "01hxlegacy0000000000000000",
                "status": "completed",
                "phases": [],
                "functionName": "old-fn",
                "project": "default",
                "image": { "host": "registry.local", "name": "old-fn", "tag": "v1" },
                "pod": "fn-old-fn-deadbeef",
            }),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("Failed to insert raw document");

    let invocation = store
        .get::<Invocation>("01hxlegacy0000000000000000")
        .await
        .expect("Migration on read should succeed");
    assert_eq!(invocation.retries, 0);
    assert!(invocation.logs.is_empty());

    // 2. The next write persists the current schema version
    let invocation = store
        .update(&invocation, |i| Ok(Mutation::Replace(i)))
        .await
        .expect("Failed to update");
    let raw = backend
        .fetch("invocation", &invocation.ulid)
        .await
        .expect("Failed to fetch")
        .expect("Document should exist");
    assert_eq!(raw.schema_version, 1);

    // 3. A document from the future is fatal
    backend
        .insert(RawDocument {
            kind: "invocation".to_string(),
            id: "01hxfuture0000000000000000".to_string(),
            rev: 0,
            schema_version: 9,
            body: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("Failed to insert raw document");
    let err = store
        .get::<Invocation>("01hxfuture0000000000000000")
        .await
        .expect_err("Future schema version must fail");
    assert_eq!(err.error_code(), "MIGRATION_FAILURE");
}
