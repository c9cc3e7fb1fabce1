//! Enrolled identities and nearest-neighbour matching

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Embedding;

/// Matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum Euclidean distance (exclusive) accepted as a match
    pub distance_threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.6,
        }
    }
}

/// Match identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Unknown,
    Known(String),
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Known(id) => Some(id),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Unknown => f.write_str("Unknown"),
            Identity::Known(id) => f.write_str(id),
        }
    }
}

/// Nearest-neighbour match result
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub identity: Identity,
    /// Distance to the nearest enrolled embedding (None if nothing enrolled)
    pub distance: Option<f32>,
    /// `(1 - distance) * 100` clamped to [0, 100]; 0 for unknown faces
    pub confidence: f32,
}

impl MatchOutcome {
    fn unknown(distance: Option<f32>) -> Self {
        Self {
            identity: Identity::Unknown,
            distance,
            confidence: 0.0,
        }
    }
}

/// Read-only set of enrolled reference embeddings.
///
/// An identity may hold several references; matching is against the single
/// closest reference across all identities.
#[derive(Debug, Clone, Default)]
pub struct EnrolledSet {
    entries: Vec<(String, Embedding)>,
}

impl EnrolledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, user_id: impl Into<String>, embedding: Embedding) {
        self.entries.push((user_id.into(), embedding));
    }

    /// Number of reference embeddings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct enrolled identities, sorted
    pub fn identities(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Match against the nearest reference.
    ///
    /// Accepted only when the nearest distance is strictly below
    /// `threshold`. References with a mismatched dimension are skipped.
    pub fn best_match(&self, query: &Embedding, threshold: f32) -> MatchOutcome {
        let mut best: Option<(&str, f32)> = None;

        for (user_id, reference) in &self.entries {
            let distance = match reference.distance(query) {
                Ok(d) => d,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "skipping reference embedding");
                    continue;
                }
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((user_id, distance));
            }
        }

        match best {
            Some((user_id, distance)) if distance < threshold => MatchOutcome {
                identity: Identity::Known(user_id.to_string()),
                distance: Some(distance),
                confidence: ((1.0 - distance) * 100.0).clamp(0.0, 100.0),
            },
            Some((_, distance)) => MatchOutcome::unknown(Some(distance)),
            None => MatchOutcome::unknown(None),
        }
    }
}
