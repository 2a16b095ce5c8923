// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The invocation engine: every control-plane operation over functions and
//! invocations.
//!
//! The engine composes the pure transition functions from [`crate::invocation`]
//! with the document store. Each operation reads one consistent snapshot,
//! transforms it, and persists under the revision it read; a concurrent
//! writer surfaces as `Conflict` and the caller retries from a fresh read.
//! Side work that follows a terminal transition (runtime detection, history
//! rotation) is best-effort and never fails the transition itself.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::function::{self, FnRuntime, Function, FunctionDefinition};
use crate::invocation::{self, Invocation, InvocationStatus};
use crate::pagination::{ContinuationToken, Direction, FieldKind, Keyset, next_token};
use crate::store::index::{self, IndexKey, timestamp_key};
use crate::store::{Attachment, DocumentStore, Mutation};

/// Attachment name of the trigger input payload.
const PAYLOAD_ATTACHMENT: &str = "payload";

/// Token suffix shape of function listings: [name].
const FUNCTION_SUFFIX: &[FieldKind] = &[FieldKind::Str];

/// Token suffix shape of invocation listings: [statusBucket, createdAt].
const INVOCATION_SUFFIX: &[FieldKind] = &[FieldKind::Int, FieldKind::Str];

/// Engine tunables, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Minimum interval between progress updates on one invocation.
    pub progress_min_interval: Duration,
    /// History limit applied when a function definition declares none.
    pub default_history_limit: usize,
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            progress_min_interval: config.progress_min_interval,
            default_history_limit: config.default_history_limit,
        }
    }
}

/// Options for triggering an invocation.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    /// Input payload, stored as the `payload` attachment.
    pub payload: Option<Vec<u8>>,
    /// MIME type of the payload.
    pub content_type: Option<String>,
    /// Client-supplied deduplication key. Accepted in the surface but
    /// deduplication is not implemented; a present key is rejected.
    pub idempotency_key: Option<String>,
}

/// One lifecycle transition request.
#[derive(Debug, Clone)]
pub enum Transition {
    /// pending -> initializing.
    Handle,
    /// initializing -> running.
    Run,
    /// Partial result while running; rate limited.
    Progress {
        /// The partial result payload.
        result: Value,
    },
    /// running -> completed.
    Complete {
        /// The final result payload.
        result: Value,
    },
    /// Any non-completed status -> failed (or back to pending on retry).
    Fail {
        /// The failure reason payload.
        reason: Value,
    },
}

/// Status filter of invocation listings, expressed over index buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Every status.
    #[default]
    All,
    /// Non-terminal only (pending, initializing, running).
    Active,
    /// Terminal only (completed, failed).
    Inactive,
}

impl StatusFilter {
    fn buckets(&self) -> (i64, i64) {
        match self {
            Self::All => (0, 2),
            Self::Active => (1, 2),
            Self::Inactive => (0, 0),
        }
    }
}

/// Parameters of a function listing.
#[derive(Debug, Clone, Default)]
pub struct FunctionListing {
    /// Restrict to one project.
    pub project: Option<String>,
    /// Continuation token from a previous page.
    pub token: Option<String>,
    /// Visit order by name.
    pub descending: bool,
    /// Rows to drop before the page (first page only).
    pub skip: usize,
    /// Page size.
    pub limit: usize,
}

/// Parameters of an invocation listing.
#[derive(Debug, Clone, Default)]
pub struct InvocationListing {
    /// Restrict to one function. Takes precedence over `project`.
    pub function_name: Option<String>,
    /// Restrict to one project.
    pub project: Option<String>,
    /// Status filter.
    pub filter: StatusFilter,
    /// Continuation token from a previous page.
    pub token: Option<String>,
    /// Visit order by creation time.
    pub descending: bool,
    /// Rows to drop before the page (first page only).
    pub skip: usize,
    /// Page size.
    pub limit: usize,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The rows of this page.
    pub items: Vec<T>,
    /// Token resuming past the last row; absent when the listing is done.
    pub continue_token: Option<String>,
}

/// Control-plane operations over functions and invocations.
#[derive(Clone)]
pub struct InvocationEngine {
    store: DocumentStore,
    options: EngineOptions,
}

impl InvocationEngine {
    /// Create an engine over a store.
    pub fn new(store: DocumentStore, options: EngineOptions) -> Self {
        Self { store, options }
    }

    /// The underlying store.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    // =========================================================================
    // Invocation lifecycle
    // =========================================================================

    /// Trigger a new invocation of a function.
    ///
    /// Fails `NotFound` for unknown functions and `SequentialConflict` when
    /// the function is sequential and another invocation is initializing or
    /// running; the conflict check happens before any write, so a rejected
    /// trigger leaves no document behind.
    #[instrument(skip(self, options), fields(function_name = %function_name))]
    pub async fn trigger(
        &self,
        function_name: &str,
        options: TriggerOptions,
    ) -> Result<Invocation> {
        if options.idempotency_key.is_some() {
            return Err(CoreError::Validation {
                field: "idempotencyKey".to_string(),
                message: "idempotency keys are not implemented".to_string(),
            });
        }

        let function = self.store.get::<Function>(function_name).await?;

        if function.sequential {
            let running = self.active_invocations(function_name).await?;
            if !running.is_empty() {
                return Err(CoreError::SequentialConflict {
                    function: function_name.to_string(),
                });
            }
        }

        let invocation = self
            .store
            .create(invocation::new_invocation(&function, false))
            .await?;

        if let Some(payload) = options.payload.filter(|p| !p.is_empty()) {
            self.store
                .write_attachment::<Invocation>(
                    &invocation.ulid,
                    Attachment {
                        name: PAYLOAD_ATTACHMENT.to_string(),
                        content_type: options
                            .content_type
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        data: payload,
                    },
                )
                .await?;
        }

        info!(ulid = %invocation.ulid, "invocation triggered");
        Ok(invocation)
    }

    /// Apply one lifecycle transition under the revision of a fresh read.
    #[instrument(skip(self, request), fields(ulid = %ulid))]
    pub async fn transition(&self, ulid: &str, request: Transition) -> Result<Invocation> {
        let existing = self.store.get::<Invocation>(ulid).await?;

        // Log pages cleared by a retry reset; their attachments are deleted
        // after the reset is persisted.
        let mut orphaned_logs = Vec::new();

        let next = match request {
            Transition::Handle => invocation::handle(existing.clone())?,
            Transition::Run => invocation::run(existing.clone())?,
            Transition::Progress { result } => {
                self.check_progress_interval(&existing)?;
                invocation::progress(existing.clone(), result)?
            }
            Transition::Complete { result } => invocation::complete(existing.clone(), result)?,
            Transition::Fail { reason } => {
                let failed = invocation::fail(existing.clone(), reason)?;
                if failed.status == InvocationStatus::Pending {
                    orphaned_logs = existing.logs.clone();
                }
                failed
            }
        };

        let stored = self
            .store
            .update(&existing, |_| Ok(Mutation::Replace(next)))
            .await?;

        for page in orphaned_logs {
            self.store
                .delete_attachment::<Invocation>(ulid, &page.attachment)
                .await?;
        }

        if stored.status.is_terminal() {
            debug!(status = stored.status.as_str(), "invocation reached terminal status");
            self.after_terminal(&stored).await;
        }

        Ok(stored)
    }

    fn check_progress_interval(&self, invocation: &Invocation) -> Result<()> {
        if let Some(updated_at) = invocation.meta.updated_at {
            let age = Utc::now().signed_duration_since(updated_at);
            let min = chrono::Duration::from_std(self.options.progress_min_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(2));
            if age < min {
                return Err(CoreError::RateLimited {
                    ulid: invocation.ulid.clone(),
                });
            }
        }
        Ok(())
    }

    /// Post-terminal side work. Failures here are logged, never propagated:
    /// the transition already committed.
    async fn after_terminal(&self, invocation: &Invocation) {
        if invocation.runtime_test {
            if let Err(err) = self.record_runtime(invocation).await {
                warn!(ulid = %invocation.ulid, error = %err, "runtime detection not recorded");
            }
        }
        if let Err(err) = self.rotate_history(&invocation.function_name).await {
            warn!(function_name = %invocation.function_name, error = %err, "history rotation failed");
        }
    }

    /// Record the probe outcome on the owning Function.
    ///
    /// A completed probe carries the detected runtime in its result; anything
    /// else records `Unknown` with the probe's ulid so the failure can be
    /// inspected.
    async fn record_runtime(&self, invocation: &Invocation) -> Result<()> {
        let Some(function) = self.store.find::<Function>(&invocation.function_name).await? else {
            return Ok(());
        };
        if function.image != invocation.image {
            // The function moved to another image while the probe ran.
            return Ok(());
        }

        let detected = if invocation.status == InvocationStatus::Completed {
            invocation
                .result
                .as_ref()
                .and_then(|result| result.get("runtime"))
                .and_then(|runtime| serde_json::from_value::<FnRuntime>(runtime.clone()).ok())
        } else {
            None
        };
        let runtime = detected.unwrap_or_else(|| FnRuntime {
            kind: "Unknown".to_string(),
            invocation_ulid: Some(invocation.ulid.clone()),
        });

        info!(function_name = %function.name, runtime = %runtime.kind, "runtime recorded");
        self.store
            .update(&function, |mut f| {
                f.runtime = Some(runtime);
                Ok(Mutation::Replace(f))
            })
            .await?;
        Ok(())
    }

    /// Delete terminal invocations beyond the function's history limit,
    /// newest first. Active invocations are never touched.
    async fn rotate_history(&self, function_name: &str) -> Result<()> {
        let history_limit = match self.store.find::<Function>(function_name).await? {
            Some(function) => function.history_limit,
            None => self.options.default_history_limit,
        };

        let spec = index::QuerySpec {
            index: index::names::INVOCATIONS_BY_FUNCTION,
            lower_key: vec![
                IndexKey::str(function_name),
                IndexKey::Int(0),
                IndexKey::Min,
            ],
            lower_doc_id: index::DOC_ID_MIN.to_string(),
            upper_key: vec![
                IndexKey::str(function_name),
                IndexKey::Int(0),
                IndexKey::Max,
            ],
            upper_doc_id: index::DOC_ID_MAX.to_string(),
            descending: true,
            skip: history_limit,
            limit: None,
        };

        let expired = self.store.query::<Invocation>(&spec).await?;
        for invocation in expired {
            debug!(ulid = %invocation.ulid, "rotating out expired invocation");
            match self.store.delete(&invocation).await {
                Ok(_) => {}
                // A concurrent writer moved it; the next rotation will see it.
                Err(CoreError::Conflict { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn active_invocations(&self, function_name: &str) -> Result<Vec<Invocation>> {
        let spec = index::QuerySpec {
            index: index::names::INVOCATIONS_BY_FUNCTION,
            lower_key: vec![
                IndexKey::str(function_name),
                IndexKey::Int(2),
                IndexKey::Min,
            ],
            lower_doc_id: index::DOC_ID_MIN.to_string(),
            upper_key: vec![
                IndexKey::str(function_name),
                IndexKey::Int(2),
                IndexKey::Max,
            ],
            upper_doc_id: index::DOC_ID_MAX.to_string(),
            descending: false,
            skip: 0,
            limit: Some(1),
        };
        self.store.query(&spec).await
    }

    // =========================================================================
    // Logs and payloads
    // =========================================================================

    /// Store one log page. Only running invocations accept logs.
    ///
    /// Pushing the same index again replaces the page content under its
    /// original attachment name.
    #[instrument(skip(self, content), fields(ulid = %ulid, index = index))]
    pub async fn push_log(&self, ulid: &str, index: u32, content: Vec<u8>) -> Result<Invocation> {
        let existing = self.store.get::<Invocation>(ulid).await?;
        if existing.status != InvocationStatus::Running {
            return Err(CoreError::InvalidState {
                ulid: ulid.to_string(),
                expected: "running".to_string(),
                actual: existing.status.as_str().to_string(),
            });
        }

        let mut next = existing.clone();
        let attachment = invocation::push_log_page(&mut next, index);

        let stored = self
            .store
            .update(&existing, |_| Ok(Mutation::Replace(next)))
            .await?;

        self.store
            .write_attachment::<Invocation>(
                ulid,
                Attachment {
                    name: attachment,
                    content_type: "text/plain; charset=utf-8".to_string(),
                    data: content,
                },
            )
            .await?;

        Ok(stored)
    }

    /// Concatenated log content in ascending page order.
    pub async fn read_logs(&self, ulid: &str) -> Result<Vec<u8>> {
        let invocation = self.store.get::<Invocation>(ulid).await?;
        let mut content = Vec::new();
        for page in &invocation.logs {
            if let Some(attachment) = self
                .store
                .read_attachment::<Invocation>(ulid, &page.attachment)
                .await?
            {
                content.extend_from_slice(&attachment.data);
            }
        }
        Ok(content)
    }

    /// The trigger payload, if one was stored.
    pub async fn read_payload(&self, ulid: &str) -> Result<Option<Attachment>> {
        // NotFound for the document beats None for the attachment.
        self.store.get::<Invocation>(ulid).await?;
        self.store
            .read_attachment::<Invocation>(ulid, PAYLOAD_ATTACHMENT)
            .await
    }

    /// Fetch one invocation.
    pub async fn read_invocation(&self, ulid: &str) -> Result<Invocation> {
        self.store.get(ulid).await
    }

    /// Delete one invocation with its attachments.
    #[instrument(skip(self), fields(ulid = %ulid))]
    pub async fn delete_invocation(&self, ulid: &str) -> Result<()> {
        let invocation = self.store.get::<Invocation>(ulid).await?;
        self.store.delete(&invocation).await?;
        Ok(())
    }

    // =========================================================================
    // Function registry
    // =========================================================================

    /// Create or update a function definition.
    ///
    /// Creation is implicit: an unknown name becomes a new Function. On
    /// update the cached runtime follows the image (see
    /// [`function::update_function`]); whenever the stored Function ends up
    /// without a runtime, a runtime-test invocation is spawned to probe the
    /// image.
    #[instrument(skip(self, definition), fields(function_name = %definition.name))]
    pub async fn upsert_function(&self, definition: FunctionDefinition) -> Result<(Function, bool)> {
        let name = definition.name.clone();
        let default_history_limit = self.options.default_history_limit;
        let create_def = definition.clone();

        let (function, created) = self
            .store
            .upsert::<Function, _, _>(
                &name,
                move || function::create_function(create_def, default_history_limit),
                move |existing| {
                    if existing.meta.rev == 0 {
                        // Fresh seed from the factory; nothing to merge.
                        Ok(Mutation::Unchanged)
                    } else {
                        Ok(Mutation::Replace(function::update_function(
                            &existing,
                            definition,
                            default_history_limit,
                        )))
                    }
                },
            )
            .await?;

        if created {
            info!("function created");
        }

        if function.runtime.is_none() {
            let probe = self
                .store
                .create(invocation::new_invocation(&function, true))
                .await?;
            debug!(ulid = %probe.ulid, "runtime test invocation spawned");
        }

        Ok((function, created))
    }

    /// Fetch one function.
    pub async fn read_function(&self, name: &str) -> Result<Function> {
        self.store.get(name).await
    }

    /// Delete a function and every invocation it owns.
    #[instrument(skip(self), fields(function_name = %name))]
    pub async fn delete_function(&self, name: &str) -> Result<()> {
        let function = self.store.get::<Function>(name).await?;
        self.store.delete(&function).await?;

        let spec = index::QuerySpec {
            index: index::names::INVOCATIONS_BY_FUNCTION,
            lower_key: vec![IndexKey::str(name), IndexKey::Min],
            lower_doc_id: index::DOC_ID_MIN.to_string(),
            upper_key: vec![IndexKey::str(name), IndexKey::Max],
            upper_doc_id: index::DOC_ID_MAX.to_string(),
            descending: false,
            skip: 0,
            limit: None,
        };
        let owned = self.store.query::<Invocation>(&spec).await?;
        for invocation in owned {
            match self.store.delete(&invocation).await {
                Ok(_) | Err(CoreError::Conflict { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        info!("function deleted");
        Ok(())
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// List functions by name, optionally within one project.
    pub async fn list_functions(&self, listing: FunctionListing) -> Result<Page<Function>> {
        let keyset = match &listing.project {
            Some(project) => Keyset {
                index: index::names::FUNCTIONS_BY_PROJECT,
                prefix: vec![IndexKey::str(project.clone())],
                suffix_low: vec![IndexKey::Min],
                suffix_high: vec![IndexKey::Max],
                suffix_shape: FUNCTION_SUFFIX,
            },
            None => Keyset {
                index: index::names::FUNCTIONS_BY_NAME,
                prefix: Vec::new(),
                suffix_low: vec![IndexKey::Min],
                suffix_high: vec![IndexKey::Max],
                suffix_shape: FUNCTION_SUFFIX,
            },
        };

        let token = listing
            .token
            .as_deref()
            .map(|raw| ContinuationToken::decode(raw, FUNCTION_SUFFIX))
            .transpose()?;
        let direction = if listing.descending {
            Direction::Desc
        } else {
            Direction::Asc
        };

        let spec = keyset.plan(token.as_ref(), direction, listing.skip, listing.limit);
        let items = self.store.query::<Function>(&spec).await?;

        let last = items.last().map(|function| ContinuationToken {
            doc_id: function.name.clone(),
            suffix: vec![IndexKey::str(function.name.clone())],
        });
        let continue_token = next_token(items.len(), listing.limit, last);

        Ok(Page {
            items,
            continue_token,
        })
    }

    /// List invocations by creation time, filtered by function or project and
    /// status bucket.
    pub async fn list_invocations(&self, listing: InvocationListing) -> Result<Page<Invocation>> {
        let (low, high) = listing.filter.buckets();
        let suffix_low = vec![IndexKey::Int(low), IndexKey::Min];
        let suffix_high = vec![IndexKey::Int(high), IndexKey::Max];

        let keyset = if let Some(function_name) = &listing.function_name {
            Keyset {
                index: index::names::INVOCATIONS_BY_FUNCTION,
                prefix: vec![IndexKey::str(function_name.clone())],
                suffix_low,
                suffix_high,
                suffix_shape: INVOCATION_SUFFIX,
            }
        } else if let Some(project) = &listing.project {
            Keyset {
                index: index::names::INVOCATIONS_BY_PROJECT,
                prefix: vec![IndexKey::str(project.clone())],
                suffix_low,
                suffix_high,
                suffix_shape: INVOCATION_SUFFIX,
            }
        } else {
            Keyset {
                index: index::names::INVOCATIONS_BY_STATUS,
                prefix: Vec::new(),
                suffix_low,
                suffix_high,
                suffix_shape: INVOCATION_SUFFIX,
            }
        };

        let token = listing
            .token
            .as_deref()
            .map(|raw| ContinuationToken::decode(raw, INVOCATION_SUFFIX))
            .transpose()?;
        let direction = if listing.descending {
            Direction::Desc
        } else {
            Direction::Asc
        };

        let spec = keyset.plan(token.as_ref(), direction, listing.skip, listing.limit);
        let items = self.store.query::<Invocation>(&spec).await?;

        let last = items.last().and_then(|invocation| {
            let bucket = index::status_bucket(invocation.status.as_str())?;
            let created_at = invocation.meta.created_at?;
            Some(ContinuationToken {
                doc_id: invocation.ulid.clone(),
                suffix: vec![
                    IndexKey::Int(bucket),
                    IndexKey::str(timestamp_key(&created_at)),
                ],
            })
        });
        let continue_token = next_token(items.len(), listing.limit, last);

        Ok(Page {
            items,
            continue_token,
        })
    }
}
