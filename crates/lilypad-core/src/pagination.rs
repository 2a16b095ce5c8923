// Copyright (C) 2026 Lilypad Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keyset pagination over declared indexes.
//!
//! A listing is described by a [`Keyset`]: the index, a fixed key prefix, and
//! the open range of the variable suffix. Each page is one bounded range scan
//! ([`QuerySpec`]); the continuation token carries the last row's variable
//! suffix and document id, so the next page resumes exactly past it with no
//! gaps or duplicates, regardless of writes between requests. Tokens are
//! opaque to clients and carry no server-side state.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{CoreError, Result};
use crate::store::index::{DOC_ID_MAX, DOC_ID_MIN, IndexKey, QuerySpec};

/// Page visit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Asc,
    /// Descending key order.
    Desc,
}

/// Shape of one variable-suffix component, used to parse token fields back
/// into typed key components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer component (status buckets).
    Int,
    /// String component (names, timestamps).
    Str,
}

/// A decoded continuation token: the exact index position of the last row of
/// the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    /// Document id of the last row.
    pub doc_id: String,
    /// Variable-suffix components of the last row's index key.
    pub suffix: Vec<IndexKey>,
}

impl ContinuationToken {
    /// Encode to the wire form: URL-safe base64 over comma-joined fields,
    /// document id first. Components never contain commas (slugs, buckets,
    /// RFC 3339 dates).
    pub fn encode(&self) -> String {
        let mut fields = vec![self.doc_id.clone()];
        for key in &self.suffix {
            match key {
                IndexKey::Int(v) => fields.push(v.to_string()),
                IndexKey::Str(s) => fields.push(s.clone()),
                // Sentinels never appear in real index rows.
                IndexKey::Min | IndexKey::Max => fields.push(String::new()),
            }
        }
        URL_SAFE_NO_PAD.encode(fields.join(","))
    }

    /// Decode a client-supplied token against the expected suffix shape.
    ///
    /// Any malformed input fails with a `Validation` error on the `continue`
    /// field; tokens are never trusted beyond their arity and field types.
    pub fn decode(raw: &str, shape: &[FieldKind]) -> Result<Self> {
        let invalid = |message: &str| CoreError::Validation {
            field: "continue".to_string(),
            message: message.to_string(),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| invalid("malformed continuation token"))?;
        let joined =
            String::from_utf8(bytes).map_err(|_| invalid("malformed continuation token"))?;

        let fields: Vec<&str> = joined.split(',').collect();
        if fields.len() != shape.len() + 1 {
            return Err(invalid("continuation token does not match this listing"));
        }

        let doc_id = fields[0].to_string();
        if doc_id.is_empty() {
            return Err(invalid("continuation token does not match this listing"));
        }

        let mut suffix = Vec::with_capacity(shape.len());
        for (field, kind) in fields[1..].iter().zip(shape) {
            match kind {
                FieldKind::Int => {
                    let value: i64 = field
                        .parse()
                        .map_err(|_| invalid("continuation token does not match this listing"))?;
                    suffix.push(IndexKey::Int(value));
                }
                FieldKind::Str => suffix.push(IndexKey::str(*field)),
            }
        }

        Ok(Self { doc_id, suffix })
    }
}

/// A paginatable listing over one index.
#[derive(Debug, Clone)]
pub struct Keyset {
    /// Index name from the registry.
    pub index: &'static str,
    /// Fixed leading key components shared by every row of the listing.
    pub prefix: Vec<IndexKey>,
    /// Lower bound of the variable suffix (appended after `prefix`).
    pub suffix_low: Vec<IndexKey>,
    /// Upper bound of the variable suffix.
    pub suffix_high: Vec<IndexKey>,
    /// Shape of the variable suffix as carried in tokens.
    pub suffix_shape: &'static [FieldKind],
}

impl Keyset {
    /// Build the range scan for one page.
    ///
    /// The bounds are always the collation-order endpoints: a token tightens
    /// the lower bound when ascending and the upper bound when descending,
    /// with the token's document id as the tie-breaker on that side. The row
    /// the token points at is skipped so pages never overlap.
    pub fn plan(
        &self,
        token: Option<&ContinuationToken>,
        direction: Direction,
        skip: usize,
        limit: usize,
    ) -> QuerySpec {
        let mut lower_key = self.prefix.clone();
        lower_key.extend(self.suffix_low.iter().cloned());
        let mut upper_key = self.prefix.clone();
        upper_key.extend(self.suffix_high.iter().cloned());

        let mut lower_doc_id = DOC_ID_MIN.to_string();
        let mut upper_doc_id = DOC_ID_MAX.to_string();
        let mut skip = skip;

        if let Some(token) = token {
            let mut resume = self.prefix.clone();
            resume.extend(token.suffix.iter().cloned());
            match direction {
                Direction::Asc => {
                    lower_key = resume;
                    lower_doc_id = token.doc_id.clone();
                }
                Direction::Desc => {
                    upper_key = resume;
                    upper_doc_id = token.doc_id.clone();
                }
            }
            // A token resumes exactly past the row it names; any raw skip
            // the caller sent along is meaningless at that point.
            skip = 1;
        }

        QuerySpec {
            index: self.index,
            lower_key,
            lower_doc_id,
            upper_key,
            upper_doc_id,
            descending: direction == Direction::Desc,
            skip,
            limit: Some(limit),
        }
    }
}

/// Token for the next page, emitted only when the page came back full; a
/// short page proves the listing is exhausted.
pub fn next_token(rows: usize, limit: usize, last: Option<ContinuationToken>) -> Option<String> {
    if rows == limit && limit > 0 {
        last.map(|token| token.encode())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOCATION_SHAPE: &[FieldKind] = &[FieldKind::Int, FieldKind::Str];

    fn keyset() -> Keyset {
        Keyset {
            index: "invocations_by_project",
            prefix: vec![IndexKey::str("default")],
            suffix_low: vec![IndexKey::Int(0), IndexKey::Min],
            suffix_high: vec![IndexKey::Int(2), IndexKey::Max],
            suffix_shape: INVOCATION_SHAPE,
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let token = ContinuationToken {
            doc_id: "01hxulid".to_string(),
            suffix: vec![IndexKey::Int(2), IndexKey::str("2026-08-30T12:00:00.000Z")],
        };
        let decoded = ContinuationToken::decode(&token.encode(), INVOCATION_SHAPE).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_token_rejects_garbage() {
        let err = ContinuationToken::decode("not!base64!", INVOCATION_SHAPE).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // Valid base64 but wrong arity for this listing.
        let raw = URL_SAFE_NO_PAD.encode("only-a-doc-id");
        let err = ContinuationToken::decode(&raw, INVOCATION_SHAPE).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // Non-numeric bucket field.
        let raw = URL_SAFE_NO_PAD.encode("doc,running,2026-08-30T12:00:00.000Z");
        let err = ContinuationToken::decode(&raw, INVOCATION_SHAPE).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_plan_first_page_spans_full_range() {
        let spec = keyset().plan(None, Direction::Asc, 0, 25);

        assert_eq!(
            spec.lower_key,
            vec![IndexKey::str("default"), IndexKey::Int(0), IndexKey::Min]
        );
        assert_eq!(
            spec.upper_key,
            vec![IndexKey::str("default"), IndexKey::Int(2), IndexKey::Max]
        );
        assert_eq!(spec.lower_doc_id, DOC_ID_MIN);
        assert_eq!(spec.upper_doc_id, DOC_ID_MAX);
        assert!(!spec.descending);
        assert_eq!(spec.skip, 0);
        assert_eq!(spec.limit, Some(25));
    }

    #[test]
    fn test_plan_token_tightens_lower_bound_ascending() {
        let token = ContinuationToken {
            doc_id: "01hxlast".to_string(),
            suffix: vec![IndexKey::Int(1), IndexKey::str("2026-08-30T12:00:00.000Z")],
        };
        let spec = keyset().plan(Some(&token), Direction::Asc, 0, 25);

        assert_eq!(
            spec.lower_key,
            vec![
                IndexKey::str("default"),
                IndexKey::Int(1),
                IndexKey::str("2026-08-30T12:00:00.000Z"),
            ]
        );
        assert_eq!(spec.lower_doc_id, "01hxlast");
        // Upper bound stays the listing endpoint.
        assert_eq!(spec.upper_doc_id, DOC_ID_MAX);
        // The token row itself is skipped.
        assert_eq!(spec.skip, 1);
    }

    #[test]
    fn test_plan_token_tightens_upper_bound_descending() {
        let token = ContinuationToken {
            doc_id: "01hxlast".to_string(),
            suffix: vec![IndexKey::Int(1), IndexKey::str("2026-08-30T12:00:00.000Z")],
        };
        let spec = keyset().plan(Some(&token), Direction::Desc, 2, 25);

        assert_eq!(spec.upper_doc_id, "01hxlast");
        assert_eq!(spec.lower_doc_id, DOC_ID_MIN);
        assert!(spec.descending);
        // The token overrides the caller's raw skip.
        assert_eq!(spec.skip, 1);
    }

    #[test]
    fn test_next_token_only_on_full_page() {
        let last = || {
            Some(ContinuationToken {
                doc_id: "01hx".to_string(),
                suffix: vec![IndexKey::Int(0), IndexKey::str("t")],
            })
        };
        assert!(next_token(25, 25, last()).is_some());
        assert!(next_token(24, 25, last()).is_none());
        assert!(next_token(0, 0, last()).is_none());
    }
}
