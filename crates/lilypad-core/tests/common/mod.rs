// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for lilypad-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lilypad_core::Transition;
use lilypad_core::engine::{EngineOptions, InvocationEngine, InvocationListing, TriggerOptions};
use lilypad_core::function::{FnImage, Function, FunctionDefinition};
use lilypad_core::invocation::Invocation;
use lilypad_core::store::{DocumentStore, MemoryBackend};

/// Test context bundling a memory-backed store and an engine over it.
pub struct TestContext {
    pub store: DocumentStore,
    pub engine: InvocationEngine,
}

impl TestContext {
    /// Engine with a zero progress interval so tests can progress freely.
    pub fn new() -> Self {
        Self::with_options(EngineOptions {
            progress_min_interval: Duration::ZERO,
            default_history_limit: 10,
        })
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let store = DocumentStore::new(Arc::new(MemoryBackend::new()));
        let engine = InvocationEngine::new(store.clone(), options);
        Self { store, engine }
    }

    /// Register a function and remove the runtime probe it spawns, so tests
    /// only ever see the invocations they trigger themselves.
    pub async fn register_function(&self, def: FunctionDefinition) -> Function {
        let (function, _) = self
            .engine
            .upsert_function(def)
            .await
            .expect("Failed to upsert function");

        let probes = self
            .engine
            .list_invocations(InvocationListing {
                function_name: Some(function.name.clone()),
                limit: 10,
                ..Default::default()
            })
            .await
            .expect("Failed to list probe invocations");
        for probe in probes.items {
            if probe.runtime_test {
                self.engine
                    .delete_invocation(&probe.ulid)
                    .await
                    .expect("Failed to delete probe invocation");
            }
        }

        function
    }

    /// Trigger with no payload.
    pub async fn trigger(&self, function_name: &str) -> Invocation {
        self.engine
            .trigger(function_name, TriggerOptions::default())
            .await
            .expect("Failed to trigger invocation")
    }

    /// Drive an invocation from pending to running.
    pub async fn start(&self, ulid: &str) -> Invocation {
        self.engine
            .transition(ulid, Transition::Handle)
            .await
            .expect("Failed to handle invocation");
        self.engine
            .transition(ulid, Transition::Run)
            .await
            .expect("Failed to run invocation")
    }
}

/// A plain function definition for tests.
pub fn definition(name: &str) -> FunctionDefinition {
    FunctionDefinition {
        name: name.to_string(),
        project: "default".to_string(),
        image: FnImage::parse("registry.local/test/image:v1").expect("Failed to parse image"),
        env: Vec::new(),
        resources: None,
        history_limit: None,
        sequential: false,
        retries: 0,
        timeout: None,
    }
}
