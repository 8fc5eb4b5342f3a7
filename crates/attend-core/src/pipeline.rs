//! One per-frame update cycle: gate → track → match → presence.

use crate::config::PipelineConfig;
use crate::matcher::{CosineMatcher, Matcher};
use crate::presence::PresenceTracker;
use crate::quality::QualityGate;
use crate::roster::Roster;
use crate::tracker::{GatedDetection, ResolvedTrack, Track, Tracker};
use crate::types::{Detection, EmployeeId, PresenceEvent};
use image::RgbImage;
use std::collections::BTreeSet;

/// Result of processing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// Transitions that fired this frame, ordered by employee id.
    pub events: Vec<PresenceEvent>,
    /// Live tracks with a bound identity.
    pub resolved: Vec<ResolvedTrack>,
    pub accepted: usize,
    pub rejected: usize,
}

/// Per-camera recognition state. Owned by exactly one camera loop.
pub struct FramePipeline<M: Matcher = CosineMatcher> {
    gate: QualityGate,
    tracker: Tracker<M>,
    presence: PresenceTracker,
}

impl FramePipeline<CosineMatcher> {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_matcher(config, CosineMatcher)
    }
}

impl<M: Matcher> FramePipeline<M> {
    pub fn with_matcher(config: &PipelineConfig, matcher: M) -> Self {
        Self {
            gate: QualityGate::from_config(config),
            tracker: Tracker::with_matcher(config, matcher),
            presence: PresenceTracker::new(config),
        }
    }

    /// Register every roster identity with the presence state machine.
    pub fn apply_roster(&mut self, roster: &Roster) {
        self.presence.track_all(roster.employee_ids());
        tracing::debug!(
            roster = roster.len(),
            tracked = self.presence.len(),
            "roster applied to presence state"
        );
    }

    /// Run one update cycle for `frame` and the model's `detections`.
    pub fn process(
        &mut self,
        frame: &RgbImage,
        detections: Vec<Detection>,
        roster: &Roster,
        now: f64,
    ) -> FrameOutcome {
        let total = detections.len();
        let gated: Vec<GatedDetection> = detections
            .into_iter()
            .filter_map(|d| {
                let verdict = self.gate.assess_in_frame(frame, &d.bbox);
                match (verdict.accepted, verdict.metrics) {
                    (true, Some(quality)) => Some(GatedDetection {
                        bbox: d.bbox,
                        embedding: d.embedding,
                        quality,
                    }),
                    _ => None,
                }
            })
            .collect();
        let accepted = gated.len();

        let resolved = self.tracker.update(gated, roster.entries(), now);
        let recognized: BTreeSet<EmployeeId> = resolved.iter().map(|r| r.employee_id).collect();
        let events = self.presence.update(&recognized, now);

        if total > 0 {
            tracing::trace!(
                detections = total,
                accepted,
                recognized = recognized.len(),
                live_tracks = self.tracker.tracks().len(),
                "frame processed"
            );
        }

        FrameOutcome {
            events,
            resolved,
            accepted,
            rejected: total - accepted,
        }
    }

    /// All live tracks, for overlays and diagnostics.
    pub fn tracks(&self) -> &[Track] {
        self.tracker.tracks()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }
}
