// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Permission snapshot cache.
//!
//! Grants are derived data: Scope documents define permission bundles, User
//! documents attach to them by name. Rebuilding means scanning both kinds, so
//! the cache refreshes at most once per interval and concurrent callers share
//! the in-flight rebuild instead of stacking scans (single-flight). A failed
//! rebuild resets the clock so the next caller retries immediately, while the
//! last good snapshot stays in place for anyone not part of the failed cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::scope::{Role, Scope};
use crate::store::DocumentStore;
use crate::user::User;

/// Resolved permissions of one subject. Role weights instead of names, so a
/// check is a single comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants {
    /// Full administrative access.
    pub admin: bool,
    /// Weight granted on every project.
    pub role: u8,
    /// Per-project weights; zero-weight entries are dropped at build time.
    pub projects: HashMap<String, u8>,
}

impl Grants {
    fn admin() -> Self {
        Self {
            admin: true,
            role: 0,
            projects: HashMap::new(),
        }
    }
}

/// What an operation requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The admin flag itself; no role weight substitutes for it.
    Admin,
    /// At least this role, globally or on the named project.
    Role(Role),
}

type Snapshot = Arc<HashMap<String, Grants>>;
type Rebuild = Shared<BoxFuture<'static, Result<Snapshot>>>;

struct CacheState {
    /// When the current snapshot generation started building. `None` forces
    /// a rebuild on the next lookup.
    last_refresh: Option<Instant>,
    snapshot: Snapshot,
    inflight: Option<Rebuild>,
}

/// Subject-to-grants cache over the document store.
pub struct GrantsCache {
    store: DocumentStore,
    refresh_interval: Duration,
    state: Mutex<CacheState>,
}

impl GrantsCache {
    /// Create a cache. The first lookup triggers the first rebuild.
    pub fn new(store: DocumentStore, refresh_interval: Duration) -> Self {
        Self {
            store,
            refresh_interval,
            state: Mutex::new(CacheState {
                last_refresh: None,
                snapshot: Arc::new(HashMap::new()),
                inflight: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve the grants of a subject, rebuilding the snapshot when stale.
    ///
    /// Unknown subjects resolve to empty grants. Every caller that joins a
    /// rebuild cycle observes that cycle's outcome, including its error.
    pub async fn grants_for(&self, subject: &str) -> Result<Grants> {
        // The reserved admin subject never goes through the store.
        if subject == "admin" {
            return Ok(Grants::admin());
        }

        let rebuild = {
            let mut state = self.lock();
            if state.inflight.is_none()
                && state
                    .last_refresh
                    .is_none_or(|at| at.elapsed() >= self.refresh_interval)
            {
                state.last_refresh = Some(Instant::now());
                let store = self.store.clone();
                let fut: Rebuild = async move { build_snapshot(&store).await }.boxed().shared();
                state.inflight = Some(fut.clone());
                Some(fut)
            } else {
                state.inflight.clone()
            }
        };

        if let Some(rebuild) = rebuild {
            let outcome = rebuild.clone().await;
            let mut state = self.lock();
            let current = state
                .inflight
                .as_ref()
                .is_some_and(|inflight| Shared::ptr_eq(inflight, &rebuild));
            match outcome {
                Ok(snapshot) => {
                    if current {
                        debug!(subjects = snapshot.len(), "grants snapshot rebuilt");
                        state.snapshot = snapshot;
                        state.inflight = None;
                    }
                }
                Err(err) => {
                    if current {
                        warn!(error = %err, "grants snapshot rebuild failed");
                        state.inflight = None;
                        // Let the next caller retry right away.
                        state.last_refresh = None;
                    }
                    return Err(err);
                }
            }
        }

        let state = self.lock();
        Ok(state.snapshot.get(subject).cloned().unwrap_or_default())
    }

    /// Check a subject against a requirement, failing with `Forbidden`.
    pub async fn enforce(
        &self,
        subject: &str,
        requirement: Requirement,
        project: Option<&str>,
    ) -> Result<()> {
        let grants = self.grants_for(subject).await?;
        if allows(&grants, requirement, project) {
            Ok(())
        } else {
            Err(CoreError::Forbidden {
                subject: subject.to_string(),
            })
        }
    }
}

/// Pure requirement check against resolved grants.
pub fn allows(grants: &Grants, requirement: Requirement, project: Option<&str>) -> bool {
    match requirement {
        Requirement::Admin => grants.admin,
        Requirement::Role(_) if grants.admin => true,
        Requirement::Role(role) => {
            let project_weight = project
                .and_then(|name| grants.projects.get(name).copied())
                .unwrap_or(0);
            grants.role.max(project_weight) >= role.weight()
        }
    }
}

/// Scan every Scope and User document into a subject-to-grants map.
async fn build_snapshot(store: &DocumentStore) -> Result<Snapshot> {
    let mut by_scope: HashMap<String, Grants> = HashMap::new();
    for scope in store.scan::<Scope>().await? {
        let mut projects = HashMap::new();
        for (project, role) in &scope.projects {
            let weight = role.weight();
            if weight > 0 {
                projects.insert(project.clone(), weight);
            }
        }
        by_scope.insert(
            scope.name.clone(),
            Grants {
                admin: scope.admin,
                role: scope.role.map(|role| role.weight()).unwrap_or(0),
                projects,
            },
        );
    }

    let mut by_subject: HashMap<String, Grants> = HashMap::new();
    for user in store.scan::<User>().await? {
        if let Some(grants) = user.scope.as_deref().and_then(|name| by_scope.get(name)) {
            by_subject.insert(user.username, grants.clone());
        }
    }
    by_subject.insert("admin".to_string(), Grants::admin());

    Ok(Arc::new(by_subject))
}
