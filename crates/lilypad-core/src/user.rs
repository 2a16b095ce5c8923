// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User documents. Credential hashing and verification are external; the
//! document only carries the opaque hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{DocMeta, Entity};

/// A stored user document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Username (document id).
    pub username: String,
    /// Opaque credential hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Name of the scope granting this user's permissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Account expiry, enforced by the authentication boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Store envelope bookkeeping.
    #[serde(skip)]
    pub meta: DocMeta,
}

impl Entity for User {
    const KIND: &'static str = "user";

    fn doc_id(&self) -> String {
        self.username.clone()
    }

    fn meta(&self) -> &DocMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DocMeta {
        &mut self.meta
    }
}
