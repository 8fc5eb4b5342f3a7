//! Nearest-neighbour identity matching against the roster.

use crate::roster::RosterEntry;
use crate::types::{Embedding, EmployeeId};

/// A roster identity whose reference embedding is close enough to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityMatch {
    pub employee_id: EmployeeId,
    /// Cosine similarity of the best entry, in [-1, 1].
    pub similarity: f32,
}

/// Strategy for resolving an aggregated track embedding to a roster identity.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        roster: &[RosterEntry],
        threshold: f32,
    ) -> Option<IdentityMatch>;
}

/// Cosine similarity matcher with a full roster scan.
///
/// The first entry wins on equal similarity. A match requires the best
/// similarity to strictly exceed the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        roster: &[RosterEntry],
        threshold: f32,
    ) -> Option<IdentityMatch> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in roster.iter().enumerate() {
            let sim = probe.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => Some(IdentityMatch {
                employee_id: roster[idx].employee_id,
                similarity: best_sim,
            }),
            Some(_) => {
                tracing::debug!(
                    best = best_sim,
                    threshold,
                    "no match: best similarity below threshold"
                );
                None
            }
            None => None,
        }
    }
}
