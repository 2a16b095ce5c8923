// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation documents and their pure lifecycle transitions.
//!
//! An Invocation snapshots the Function it was triggered from and walks a
//! fixed status ladder:
//!
//! ```text
//!   pending -> initializing -> running -> completed
//!                                  |
//!                                  v
//!                               failed -> pending   (while retries remain)
//! ```
//!
//! Every transition here is a pure value transform; persistence, rate
//! limiting, and attachment handling live in the engine. Transitions validate
//! the source status and fail with `InvalidState` otherwise, so a stale
//! concurrent caller can never push an invocation backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::function::{FnEnv, FnImage, FnResources, Function};
use crate::store::{DocMeta, Entity};

/// Invocation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// Created, waiting for a pod.
    Pending,
    /// Pod requested, not serving yet.
    Initializing,
    /// Executing.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished with an error and no retries left. Terminal.
    Failed,
}

impl InvocationStatus {
    /// The serialized (lowercase) form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether this status never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One recorded lifecycle step.
///
/// The status field also takes the value `"progress"`, which is a phase but
/// never a status: a progress update replaces the previous progress phase
/// instead of appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Status entered, or `"progress"`.
    pub status: String,
    /// When the phase was recorded.
    pub date: DateTime<Utc>,
    /// Pod that carried the invocation at that point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    /// Failure reason, recorded on `failed` phases only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
}

/// Bookkeeping for one stored log page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    /// Attachment holding the page content. Immutable once assigned.
    pub attachment: String,
    /// Last write to this page.
    pub date: DateTime<Utc>,
    /// Page position; `logs` stays unique and ascending by this.
    pub index: u32,
}

/// A stored invocation document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Lowercased ULID (document id).
    pub ulid: String,
    /// Current status.
    pub status: InvocationStatus,
    /// Lifecycle history, append-only apart from the progress phase.
    pub phases: Vec<Phase>,
    /// The Function this invocation was triggered from.
    pub function_name: String,
    /// Owning project, snapshotted from the Function.
    pub project: String,
    /// Image snapshot.
    pub image: FnImage,
    /// Environment snapshot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<FnEnv>,
    /// Resources snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<FnResources>,
    /// Pod expected to serve this invocation; replaced on auto-retry.
    pub pod: String,
    /// Automatic retries left.
    #[serde(default)]
    pub retries: u32,
    /// Last result payload (progress or completion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Value>,
    /// Stored log pages, ascending by index.
    #[serde(default)]
    pub logs: Vec<LogPage>,
    /// Probe invocation spawned to detect the Function's runtime.
    #[serde(default)]
    pub runtime_test: bool,
    /// Timeout in seconds, snapshotted from the Function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Store envelope bookkeeping.
    #[serde(skip)]
    pub meta: DocMeta,
}

impl Entity for Invocation {
    const KIND: &'static str = "invocation";
    const SCHEMA_VERSION: i64 = 1;

    fn doc_id(&self) -> String {
        self.ulid.clone()
    }

    fn meta(&self) -> &DocMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocMeta {
        &mut self.meta
    }

    fn migrate(version: i64, mut body: Value) -> Result<Value> {
        match version {
            // v0 documents predate paged logs and auto-retry.
            0 => {
                if let Some(obj) = body.as_object_mut() {
                    obj.entry("logs").or_insert(serde_json::json!([]));
                    obj.entry("retries").or_insert(serde_json::json!(0));
                }
                Ok(body)
            }
            _ => Err(CoreError::MigrationFailure {
                kind: Self::KIND,
                stored: version,
                supported: Self::SCHEMA_VERSION,
            }),
        }
    }
}

fn pod_name(function_name: &str) -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!("fn-{}-{}", function_name, &entropy[..8])
}

/// Build a fresh `pending` invocation from a Function snapshot.
pub fn new_invocation(function: &Function, runtime_test: bool) -> Invocation {
    let ulid = Ulid::new().to_string().to_lowercase();
    let pod = pod_name(&function.name);
    let now = Utc::now();

    Invocation {
        ulid,
        status: InvocationStatus::Pending,
        phases: vec![Phase {
            status: InvocationStatus::Pending.as_str().to_string(),
            date: now,
            pod: Some(pod.clone()),
            reason: None,
        }],
        function_name: function.name.clone(),
        project: function.project.clone(),
        image: function.image.clone(),
        env: function.env.clone(),
        resources: function.resources.clone(),
        pod,
        retries: function.retries,
        result: None,
        reason: None,
        logs: Vec::new(),
        runtime_test,
        timeout: function.timeout,
        meta: DocMeta::default(),
    }
}

fn push_status(mut invocation: Invocation, status: InvocationStatus) -> Invocation {
    invocation.phases.push(Phase {
        status: status.as_str().to_string(),
        date: Utc::now(),
        pod: Some(invocation.pod.clone()),
        reason: if status == InvocationStatus::Failed {
            invocation.reason.clone()
        } else {
            None
        },
    });
    invocation.status = status;
    invocation
}

fn expect_status(invocation: &Invocation, expected: InvocationStatus) -> Result<()> {
    if invocation.status != expected {
        return Err(CoreError::InvalidState {
            ulid: invocation.ulid.clone(),
            expected: expected.as_str().to_string(),
            actual: invocation.status.as_str().to_string(),
        });
    }
    Ok(())
}

/// pending -> initializing.
pub fn handle(invocation: Invocation) -> Result<Invocation> {
    expect_status(&invocation, InvocationStatus::Pending)?;
    Ok(push_status(invocation, InvocationStatus::Initializing))
}

/// initializing -> running.
pub fn run(invocation: Invocation) -> Result<Invocation> {
    expect_status(&invocation, InvocationStatus::Initializing)?;
    Ok(push_status(invocation, InvocationStatus::Running))
}

/// Record a partial result while `running`.
///
/// The previous progress phase is replaced, never duplicated, so a
/// long-running invocation's history does not grow with every heartbeat.
pub fn progress(mut invocation: Invocation, result: Value) -> Result<Invocation> {
    expect_status(&invocation, InvocationStatus::Running)?;

    invocation.phases.retain(|phase| phase.status != "progress");
    invocation.phases.push(Phase {
        status: "progress".to_string(),
        date: Utc::now(),
        pod: Some(invocation.pod.clone()),
        reason: None,
    });
    invocation.result = Some(result);
    Ok(invocation)
}

/// running -> completed.
pub fn complete(mut invocation: Invocation, result: Value) -> Result<Invocation> {
    expect_status(&invocation, InvocationStatus::Running)?;
    invocation.result = Some(result);
    Ok(push_status(invocation, InvocationStatus::Completed))
}

/// Any non-completed status -> failed; loops back to `pending` while retries
/// remain.
///
/// The retry reset mints a new pod name, clears the reason, result, and log
/// bookkeeping, and decrements the budget. The caller owns deleting the log
/// page attachments the cleared entries pointed at.
pub fn fail(mut invocation: Invocation, reason: Value) -> Result<Invocation> {
    if invocation.status == InvocationStatus::Completed {
        return Err(CoreError::InvalidState {
            ulid: invocation.ulid.clone(),
            expected: "any non-completed".to_string(),
            actual: invocation.status.as_str().to_string(),
        });
    }

    invocation.reason = Some(reason);
    invocation.result = None;
    let mut invocation = push_status(invocation, InvocationStatus::Failed);

    if invocation.retries == 0 {
        return Ok(invocation);
    }

    invocation.retries -= 1;
    invocation.pod = pod_name(&invocation.function_name);
    invocation.reason = None;
    invocation.logs.clear();
    Ok(push_status(invocation, InvocationStatus::Pending))
}

/// Place one log page, idempotently.
///
/// An index keeps the attachment name it was first stored under; repeated
/// pushes to the same index only refresh the timestamp. Returns the
/// attachment name the caller must write the content to.
pub fn push_log_page(invocation: &mut Invocation, index: u32) -> String {
    let mut attachment = format!("page_{}.txt", index);
    if let Some(existing) = invocation.logs.iter().find(|page| page.index == index) {
        attachment = existing.attachment.clone();
    }

    invocation.logs.retain(|page| page.index != index);
    invocation.logs.push(LogPage {
        attachment: attachment.clone(),
        date: Utc::now(),
        index,
    });
    invocation.logs.sort_by_key(|page| page.index);
    attachment
}
