// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function definitions.
//!
//! A Function is the deployable unit: a container image plus invocation
//! defaults. Documents are keyed by the function name. The detected runtime
//! is a cached probe result and is discarded whenever the image changes.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::store::{DocMeta, Entity};

/// A container image reference split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnImage {
    /// Registry host (e.g. `docker.io`).
    pub host: String,
    /// Repository path (e.g. `library/node`).
    pub name: String,
    /// Image tag.
    pub tag: String,
}

impl FnImage {
    /// Parse a `host/name:tag` reference.
    ///
    /// The tag is required: mutable references like `latest`-by-omission
    /// would make the image-change detection meaningless.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = || CoreError::Validation {
            field: "image".to_string(),
            message: format!("'{}' is not a valid host/name:tag reference", reference),
        };

        let (repository, tag) = reference.rsplit_once(':').ok_or_else(invalid)?;
        let (host, name) = repository.split_once('/').ok_or_else(invalid)?;
        if host.is_empty() || name.is_empty() || tag.is_empty() || tag.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// The full `host/name:tag` reference.
    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.host, self.name, self.tag)
    }
}

/// One environment variable, either inline or resolved from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FnEnv {
    /// Variable name.
    pub name: String,
    /// Inline value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Secret to resolve the value from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Key inside the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// cpu/memory quantity pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU quantity (e.g. `100m`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g. `128Mi`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Requested and maximum resources for invocation pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnResources {
    /// Requested resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceSpec>,
    /// Resource limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
}

/// Detected runtime descriptor, recorded by the runtime-test invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FnRuntime {
    /// Runtime type reported by the probe, or `"Unknown"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The probe invocation, recorded when detection failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_ulid: Option<String>,
}

impl FnRuntime {
    /// Whether this record carries a usable detection result.
    pub fn is_known(&self) -> bool {
        self.kind != "Unknown"
    }
}

/// The fields a caller controls when creating or updating a Function.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    /// Function name (slug, doubles as document id).
    pub name: String,
    /// Owning project.
    pub project: String,
    /// Container image.
    pub image: FnImage,
    /// Environment variables.
    pub env: Vec<FnEnv>,
    /// Pod resources.
    pub resources: Option<FnResources>,
    /// Terminal invocations to keep; `None` takes the configured default.
    pub history_limit: Option<usize>,
    /// Reject concurrent invocations.
    pub sequential: bool,
    /// Automatic retries per invocation.
    pub retries: u32,
    /// Invocation timeout in seconds.
    pub timeout: Option<u64>,
}

/// A stored function document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    /// Function name (document id).
    pub name: String,
    /// Owning project.
    pub project: String,
    /// Container image.
    pub image: FnImage,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<FnEnv>,
    /// Pod resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<FnResources>,
    /// Terminal invocations kept by history rotation.
    pub history_limit: usize,
    /// Reject concurrent invocations.
    pub sequential: bool,
    /// Automatic retries granted to each new invocation.
    pub retries: u32,
    /// Invocation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Cached runtime detection result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<FnRuntime>,
    /// Store envelope bookkeeping.
    #[serde(skip)]
    pub meta: DocMeta,
}

impl Entity for Function {
    const KIND: &'static str = "function";
    const SCHEMA_VERSION: i64 = 1;

    fn doc_id(&self) -> String {
        self.name.clone()
    }

    fn meta(&self) -> &DocMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocMeta {
        &mut self.meta
    }

    fn migrate(version: i64, mut body: serde_json::Value) -> Result<serde_json::Value> {
        match version {
            // v0 documents predate history rotation and auto-retry.
            0 => {
                if let Some(obj) = body.as_object_mut() {
                    obj.entry("historyLimit").or_insert(json!(10));
                    obj.entry("sequential").or_insert(json!(false));
                    obj.entry("retries").or_insert(json!(0));
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

/// Build a brand-new Function from a definition.
pub fn create_function(def: FunctionDefinition, default_history_limit: usize) -> Function {
    Function {
        name: def.name,
        project: def.project,
        image: def.image,
        env: def.env,
        resources: def.resources,
        history_limit: def.history_limit.unwrap_or(default_history_limit),
        sequential: def.sequential,
        retries: def.retries,
        timeout: def.timeout,
        runtime: None,
        meta: DocMeta::default(),
    }
}

/// Apply a definition on top of an existing Function.
///
/// The cached runtime survives only when the image is unchanged and the
/// recorded detection actually succeeded; an `"Unknown"` record is dropped so
/// the next update probes again.
pub fn update_function(
    existing: &Function,
    def: FunctionDefinition,
    default_history_limit: usize,
) -> Function {
    let runtime = if def.image == existing.image {
        existing.runtime.clone().filter(FnRuntime::is_known)
    } else {
        None
    };

    Function {
        name: def.name,
        project: def.project,
        image: def.image,
        env: def.env,
        resources: def.resources,
        history_limit: def.history_limit.unwrap_or(default_history_limit),
        sequential: def.sequential,
        retries: def.retries,
        timeout: def.timeout,
        runtime,
        meta: existing.meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, image: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            project: "default".to_string(),
            image: FnImage::parse(image).unwrap(),
            env: Vec::new(),
            resources: None,
            history_limit: None,
            sequential: false,
            retries: 0,
            timeout: None,
        }
    }

    #[test]
    fn test_image_parse() {
        let image = FnImage::parse("docker.io/library/node:22-alpine").unwrap();
        assert_eq!(image.host, "docker.io");
        assert_eq!(image.name, "library/node");
        assert_eq!(image.tag, "22-alpine");
        assert_eq!(image.reference(), "docker.io/library/node:22-alpine");

        assert!(FnImage::parse("node").is_err());
        assert!(FnImage::parse("node:22").is_err());
        assert!(FnImage::parse("docker.io/node:").is_err());
    }

    #[test]
    fn test_create_uses_default_history_limit() {
        let function = create_function(definition("my-fn", "registry.local/my-fn:v1"), 10);
        assert_eq!(function.history_limit, 10);
        assert!(function.runtime.is_none());

        let mut def = definition("my-fn", "registry.local/my-fn:v1");
        def.history_limit = Some(3);
        assert_eq!(create_function(def, 10).history_limit, 3);
    }

    #[test]
    fn test_update_keeps_runtime_on_same_image() {
        let mut existing = create_function(definition("my-fn", "registry.local/my-fn:v1"), 10);
        existing.runtime = Some(FnRuntime {
            kind: "Node.js".to_string(),
            invocation_ulid: None,
        });

        let updated = update_function(
            &existing,
            definition("my-fn", "registry.local/my-fn:v1"),
            10,
        );
        assert!(updated.runtime.is_some());
    }

    #[test]
    fn test_update_clears_runtime_on_image_change() {
        let mut existing = create_function(definition("my-fn", "registry.local/my-fn:v1"), 10);
        existing.runtime = Some(FnRuntime {
            kind: "Node.js".to_string(),
            invocation_ulid: None,
        });

        let updated = update_function(
            &existing,
            definition("my-fn", "registry.local/my-fn:v2"),
            10,
        );
        assert!(updated.runtime.is_none());
    }

    #[test]
    fn test_update_drops_unknown_runtime() {
        let mut existing = create_function(definition("my-fn", "registry.local/my-fn:v1"), 10);
        existing.runtime = Some(FnRuntime {
            kind: "Unknown".to_string(),
            invocation_ulid: Some("01hxprobe".to_string()),
        });

        let updated = update_function(
            &existing,
            definition("my-fn", "registry.local/my-fn:v1"),
            10,
        );
        assert!(updated.runtime.is_none());
    }

    #[test]
    fn test_migrate_v0_defaults() {
        let body = serde_json::json!({
            "name": "legacy-fn",
            "project": "default",
            "image": { "host": "registry.local", "name": "legacy-fn", "tag": "v1" },
        });
        let migrated = Function::migrate(0, body).unwrap();
        assert_eq!(migrated["historyLimit"], 10);
        assert_eq!(migrated["sequential"], false);
        assert_eq!(migrated["retries"], 0);

        assert!(Function::migrate(7, serde_json::json!({})).is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let function = create_function(definition("my-fn", "registry.local/my-fn:v1"), 10);
        let value = serde_json::to_value(&function).unwrap();
        assert!(value.get("historyLimit").is_some());
        assert!(value.get("history_limit").is_none());
    }
}
