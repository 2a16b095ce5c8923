// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lilypad Core - FaaS Control Plane
//!
//! This crate is the control plane of a function-as-a-service platform. It
//! stores Function definitions, accepts trigger requests that spawn
//! Invocations, tracks their lifecycle to completion or failure, and enforces
//! project-scoped role-based access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API / Scheduler                    │
//! │            (routing, auth transport, pod control)            │
//! └─────────────────────────────────────────────────────────────┘
//!            │                  │                    │
//!            ▼                  ▼                    ▼
//! ┌──────────────────┐  ┌──────────────┐  ┌────────────────────┐
//! │ InvocationEngine │  │  GrantsCache │  │  Keyset pagination │
//! │  (This Crate)    │  │ subject →    │  │  tokens, planning  │
//! │  trigger, state  │  │ grants       │  │                    │
//! │  machine, logs   │  │ snapshot     │  │                    │
//! └──────────────────┘  └──────────────┘  └────────────────────┘
//!            │                  │                    │
//!            └──────────────────┼────────────────────┘
//!                               ▼
//!                    ┌──────────────────┐
//!                    │  DocumentStore   │
//!                    │  revision CAS,   │
//!                    │  lazy migration  │
//!                    └──────────────────┘
//!                       │            │
//!                       ▼            ▼
//!               ┌──────────────┐ ┌───────────────┐
//!               │ MemoryBackend│ │ SqliteBackend │
//!               └──────────────┘ └───────────────┘
//! ```
//!
//! # Invocation Status State Machine
//!
//! ```text
//!      ┌─────────┐
//!      │ PENDING │◄───────────────┐
//!      └────┬────┘                │
//!           │ handle              │ retry
//!           ▼                     │ (retries > 0)
//!   ┌──────────────┐              │
//!   │ INITIALIZING │              │
//!   └──────┬───────┘              │
//!          │ run                  │
//!          ▼                      │
//!     ┌─────────┐   fail     ┌────┴────┐
//!     │ RUNNING │───────────►│ FAILED  │
//!     └────┬────┘            └─────────┘
//!          │ complete
//!          ▼
//!    ┌───────────┐
//!    │ COMPLETED │
//!    └───────────┘
//! ```
//!
//! `progress` records a partial result while `running` without changing the
//! status; `fail` is also accepted from `pending` and `initializing`.
//! `completed` and `failed` (with no retries left) are terminal.
//!
//! # Concurrency Model
//!
//! Every stored document carries an integer revision; every write presents
//! the revision it read and loses with `Conflict` when a concurrent writer
//! got there first. This revision check is the only cross-request
//! concurrency control. Sequential-function exclusivity and history rotation
//! are documented best-effort read-then-act checks on top of it; the grants
//! snapshot rebuild is the only explicitly coordinated shared state
//! (single-flight).
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LILYPAD_DATABASE_URL` | Yes | - | SQLite connection string |
//! | `LILYPAD_GRANTS_REFRESH_SECS` | No | `120` | Grants snapshot rebuild interval |
//! | `LILYPAD_PROGRESS_MIN_SECS` | No | `2` | Progress update rate limit |
//! | `LILYPAD_DEFAULT_HISTORY_LIMIT` | No | `10` | Terminal invocations kept per function |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`engine`]: Invocation lifecycle and function registry operations
//! - [`error`]: Error types with stable error-code mapping
//! - [`function`], [`invocation`], [`scope`], [`user`]: Stored entities
//! - [`grants`]: Permission snapshot cache
//! - [`pagination`]: Keyset pagination and continuation tokens
//! - [`store`]: Document persistence with optimistic concurrency

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Invocation lifecycle and function registry operations.
pub mod engine;

/// Error types with stable error-code mapping.
pub mod error;

/// Function definitions.
pub mod function;

/// Permission snapshot cache.
pub mod grants;

/// Invocation documents and pure lifecycle transitions.
pub mod invocation;

/// Keyset pagination and continuation tokens.
pub mod pagination;

/// Scope documents and roles.
pub mod scope;

/// Document persistence with optimistic concurrency.
pub mod store;

/// User documents.
pub mod user;

pub use config::Config;
pub use engine::{InvocationEngine, TriggerOptions, Transition};
pub use error::{CoreError, Result};
pub use grants::GrantsCache;
pub use store::{DocumentStore, MemoryBackend, SqliteBackend};
