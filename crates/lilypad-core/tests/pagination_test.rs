// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for paginated listings.

mod common;

use std::collections::HashSet;

use common::*;
use lilypad_core::Transition;
use lilypad_core::engine::{FunctionListing, InvocationListing, StatusFilter};
use serde_json::json;

/// Seed `total` invocations for one function, completing every other one.
async fn seed_invocations(ctx: &TestContext, function_name: &str, total: usize) -> Vec<String> {
    ctx.register_function(definition(function_name)).await;

    let mut ulids = Vec::new();
    for i in 0..total {
        let invocation = ctx.trigger(function_name).await;
        if i % 2 == 0 {
            ctx.start(&invocation.ulid).await;
            ctx.engine
                .transition(&invocation.ulid, Transition::Complete { result: json!(null) })
                .await
                .expect("Failed to complete");
        }
        ulids.push(invocation.ulid);
    }
    ulids
}

#[tokio::test]
async fn test_pages_partition_the_listing() {
    let ctx = TestContext::new();
    let ulids = seed_invocations(&ctx, "paged-fn", 5).await;

    // 1. Walk the listing two rows at a time
    let mut seen: Vec<String> = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = ctx
            .engine
            .list_invocations(InvocationListing {
                function_name: Some("paged-fn".to_string()),
                token: token.clone(),
                limit: 2,
                ..Default::default()
            })
            .await
            .expect("Failed to list invocations");

        seen.extend(page.items.iter().map(|i| i.ulid.clone()));
        pages += 1;
        match page.continue_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    // 2. No gaps, no overlaps: every invocation exactly once
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 5);
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 5);
    let expected: HashSet<&String> = ulids.iter().collect();
    assert_eq!(unique, expected);
}

#[tokio::test]
async fn test_descending_yields_the_same_set_reversed() {
    let ctx = TestContext::new();
    seed_invocations(&ctx, "mirror-fn", 4).await;

    let listing = |descending: bool, token: Option<String>| InvocationListing {
        function_name: Some("mirror-fn".to_string()),
        descending,
        token,
        limit: 10,
        ..Default::default()
    };

    let asc = ctx
        .engine
        .list_invocations(listing(false, None))
        .await
        .expect("Failed to list ascending");
    let desc = ctx
        .engine
        .list_invocations(listing(true, None))
        .await
        .expect("Failed to list descending");

    let mut asc_ulids: Vec<String> = asc.items.iter().map(|i| i.ulid.clone()).collect();
    let desc_ulids: Vec<String> = desc.items.iter().map(|i| i.ulid.clone()).collect();
    asc_ulids.reverse();
    assert_eq!(asc_ulids, desc_ulids);

    // Paged descending walk partitions the same set
    let first = ctx
        .engine
        .list_invocations(InvocationListing {
            function_name: Some("mirror-fn".to_string()),
            descending: true,
            limit: 2,
            ..Default::default()
        })
        .await
        .expect("Failed to list first page");
    let second = ctx
        .engine
        .list_invocations(InvocationListing {
            function_name: Some("mirror-fn".to_string()),
            descending: true,
            token: first.continue_token.clone(),
            limit: 2,
            ..Default::default()
        })
        .await
        .expect("Failed to list second page");

    let mut walked: Vec<String> = first.items.iter().map(|i| i.ulid.clone()).collect();
    walked.extend(second.items.iter().map(|i| i.ulid.clone()));
    assert_eq!(walked, desc_ulids);

    // The second page came back full, so it still emits a token; the page
    // behind it is empty and tokenless.
    let token = second.continue_token.expect("Full page should emit a token");
    let tail = ctx
        .engine
        .list_invocations(InvocationListing {
            function_name: Some("mirror-fn".to_string()),
            descending: true,
            token: Some(token),
            limit: 2,
            ..Default::default()
        })
        .await
        .expect("Failed to list tail page");
    assert!(tail.items.is_empty());
    assert!(tail.continue_token.is_none());
}

#[tokio::test]
async fn test_status_filter_buckets() {
    let ctx = TestContext::new();
    seed_invocations(&ctx, "filtered-fn", 5).await;

    let list = |filter: StatusFilter| InvocationListing {
        function_name: Some("filtered-fn".to_string()),
        filter,
        limit: 10,
        ..Default::default()
    };

    // Indexes 0, 2, 4 were completed; 1 and 3 stay pending
    let active = ctx
        .engine
        .list_invocations(list(StatusFilter::Active))
        .await
        .expect("Failed to list active");
    assert_eq!(active.items.len(), 2);
    assert!(active.items.iter().all(|i| !i.status.is_terminal()));

    let inactive = ctx
        .engine
        .list_invocations(list(StatusFilter::Inactive))
        .await
        .expect("Failed to list inactive");
    assert_eq!(inactive.items.len(), 3);
    assert!(inactive.items.iter().all(|i| i.status.is_terminal()));

    let all = ctx
        .engine
        .list_invocations(list(StatusFilter::All))
        .await
        .expect("Failed to list all");
    assert_eq!(all.items.len(), 5);
}

#[tokio::test]
async fn test_function_listing_by_project() {
    let ctx = TestContext::new();

    for (name, project) in [
        ("alpha-fn", "default"),
        ("beta-fn", "default"),
        ("gamma-fn", "other"),
    ] {
        let mut def = definition(name);
        def.project = project.to_string();
        ctx.register_function(def).await;
    }

    let page = ctx
        .engine
        .list_functions(FunctionListing {
            project: Some("default".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .expect("Failed to list functions");
    let names: Vec<&str> = page.items.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["alpha-fn", "beta-fn"]);
    assert!(page.continue_token.is_none());

    // Unfiltered, paged by one
    let first = ctx
        .engine
        .list_functions(FunctionListing {
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("Failed to list functions");
    assert_eq!(first.items[0].name, "alpha-fn");
    let token = first.continue_token.expect("Full page should emit a token");

    let second = ctx
        .engine
        .list_functions(FunctionListing {
            token: Some(token),
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("Failed to list functions");
    assert_eq!(second.items[0].name, "beta-fn");
}

#[tokio::test]
async fn test_malformed_token_rejected() {
    let ctx = TestContext::new();
    ctx.register_function(definition("token-fn")).await;

    let err = ctx
        .engine
        .list_invocations(InvocationListing {
            function_name: Some("token-fn".to_string()),
            token: Some("not a token".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .expect_err("Malformed token must be rejected");
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // A function-listing token does not fit an invocation listing
    let page = ctx
        .engine
        .list_functions(FunctionListing {
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("Failed to list functions");
    let function_token = page.continue_token.expect("Full page should emit a token");

    let err = ctx
        .engine
        .list_invocations(InvocationListing {
            function_name: Some("token-fn".to_string()),
            token: Some(function_token),
            limit: 10,
            ..Default::default()
        })
        .await
        .expect_err("Cross-listing token must be rejected");
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}
