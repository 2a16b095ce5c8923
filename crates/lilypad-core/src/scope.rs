// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope documents: named permission bundles users attach to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::{DocMeta, Entity};

/// Project role, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read functions and invocations.
    Reader,
    /// Reader plus triggering invocations.
    Invoker,
    /// Full project control.
    Writer,
    /// Unrecognized role string in a stored document. Grants nothing.
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Capability weight; comparisons between roles go through this.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Reader => 1,
            Self::Invoker => 2,
            Self::Writer => 3,
            Self::Unknown => 0,
        }
    }
}

/// A stored scope document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name (document id).
    pub name: String,
    /// Full administrative access; overrides every role check.
    #[serde(default)]
    pub admin: bool,
    /// Role granted on every project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Per-project role grants.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub projects: HashMap<String, Role>,
    /// Store envelope bookkeeping.
    #[serde(skip)]
    pub meta: DocMeta,
}

impl Entity for Scope {
    const KIND: &'static str = "scope";

    fn doc_id(&self) -> String {
        self.name.clone()
    }

    fn meta(&self) -> &DocMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocMeta {
        &mut self.meta
    }
}
