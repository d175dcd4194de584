//! Triple: the (source, relation, target) fact unit flowing through the pipeline.
//!
//! Oracle output is lenient (missing types and descriptions are tolerated);
//! relations are normalized to lower_snake_case on construction.

use serde::{Deserialize, Serialize};

/// Sentinel type for entities whose declared type is missing or unknown.
/// Treated as a wildcard during entity resolution.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// A directed fact extracted from a document chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub source: String,
    #[serde(default = "unknown_type")]
    pub source_type: String,
    #[serde(default)]
    pub source_desc: String,
    pub target: String,
    #[serde(default = "unknown_type")]
    pub target_type: String,
    #[serde(default)]
    pub target_desc: String,
    pub relation: String,
}

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

impl Triple {
    /// Create a triple with unknown types and empty descriptions.
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_type: unknown_type(),
            source_desc: String::new(),
            target: target.into(),
            target_type: unknown_type(),
            target_desc: String::new(),
            relation: normalize_relation(&relation.into()),
        }
    }

    /// Set endpoint types (builder-style, used heavily in tests).
    pub fn with_types(mut self, source_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self.target_type = target_type.into();
        self
    }

    /// Set endpoint descriptions.
    pub fn with_descs(mut self, source_desc: impl Into<String>, target_desc: impl Into<String>) -> Self {
        self.source_desc = source_desc.into();
        self.target_desc = target_desc.into();
        self
    }

    /// Normalize in place: trim endpoints, lower_snake the relation,
    /// replace blank types with the unknown sentinel.
    pub fn normalize(&mut self) {
        self.source = self.source.trim().to_string();
        self.target = self.target.trim().to_string();
        self.relation = normalize_relation(&self.relation);
        if self.source_type.trim().is_empty() {
            self.source_type = unknown_type();
        }
        if self.target_type.trim().is_empty() {
            self.target_type = unknown_type();
        }
    }

    /// Dedup key: `(source_lower, target_lower, relation_lower)`.
    pub fn key(&self) -> (String, String, String) {
        (
            self.source.to_lowercase(),
            self.target.to_lowercase(),
            self.relation.to_lowercase(),
        )
    }

    /// Whether source and target name the same entity (case-insensitive).
    pub fn is_self_loop(&self) -> bool {
        self.source.to_lowercase() == self.target.to_lowercase()
    }
}

/// Normalize a relation label to lower_snake_case: lowercase, with runs of
/// whitespace and punctuation collapsed to single underscores.
pub fn normalize_relation(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    out
}
