//! Greedy IoU multi-face tracker.
//!
//! Associates gated detections frame to frame by bounding-box overlap,
//! accumulates embeddings per track, and binds a roster identity to a track
//! exactly once when it has collected enough samples.

use crate::config::PipelineConfig;
use crate::matcher::{CosineMatcher, IdentityMatch, Matcher};
use crate::quality::QualityMetrics;
use crate::roster::RosterEntry;
use crate::types::{BoundingBox, Embedding, EmployeeId};

/// A detection that passed the quality gate.
#[derive(Debug, Clone)]
pub struct GatedDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    pub quality: QualityMetrics,
}

/// One face observed continuously across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    embeddings: Vec<Embedding>,
    qualities: Vec<QualityMetrics>,
    pub last_bbox: BoundingBox,
    /// Pipeline clock reading of the last accepted sample.
    pub last_update: f64,
    identity: Option<IdentityMatch>,
}

impl Track {
    fn new(id: u64, detection: GatedDetection, now: f64) -> Self {
        Self {
            id,
            embeddings: vec![detection.embedding],
            qualities: vec![detection.quality],
            last_bbox: detection.bbox,
            last_update: now,
            identity: None,
        }
    }

    fn push(&mut self, detection: GatedDetection, now: f64) {
        self.embeddings.push(detection.embedding);
        self.qualities.push(detection.quality);
        self.last_bbox = detection.bbox;
        self.last_update = now;
        tracing::trace!(track = self.id, samples = self.embeddings.len(), "track sample added");
    }

    pub fn sample_count(&self) -> usize {
        self.embeddings.len()
    }

    /// Mean blur score over the accepted samples.
    pub fn mean_blur_score(&self) -> f64 {
        if self.qualities.is_empty() {
            return 0.0;
        }
        self.qualities.iter().map(|q| q.blur_score).sum::<f64>() / self.qualities.len() as f64
    }

    /// Mean of all accepted embeddings.
    pub fn aggregated_embedding(&self) -> Option<Embedding> {
        Embedding::mean(&self.embeddings)
    }

    pub fn identity(&self) -> Option<EmployeeId> {
        self.identity.map(|m| m.employee_id)
    }

    /// Similarity recorded when the identity was bound; 0.0 while unresolved.
    pub fn confidence(&self) -> f32 {
        self.identity.map(|m| m.similarity).unwrap_or(0.0)
    }
}

/// A live track with a bound identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub track_id: u64,
    pub employee_id: EmployeeId,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

pub struct Tracker<M: Matcher = CosineMatcher> {
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    min_embeddings: usize,
    max_age_secs: f64,
    match_threshold: f32,
    matcher: M,
}

impl Tracker<CosineMatcher> {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_matcher(config, CosineMatcher)
    }
}

impl<M: Matcher> Tracker<M> {
    pub fn with_matcher(config: &PipelineConfig, matcher: M) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold: config.iou_threshold,
            min_embeddings: config.min_embeddings_per_track,
            max_age_secs: config.track_max_age_secs,
            match_threshold: config.match_threshold,
            matcher,
        }
    }

    /// Advance the tracker by one frame.
    ///
    /// Returns every live track that carries a bound identity, including
    /// tracks that were not updated by this frame but have not aged out.
    pub fn update(
        &mut self,
        detections: Vec<GatedDetection>,
        roster: &[RosterEntry],
        now: f64,
    ) -> Vec<ResolvedTrack> {
        self.evict_stale(now);
        self.associate(detections, now);
        self.resolve_identities(roster);
        self.resolved_tracks()
    }

    /// All live tracks, resolved or not.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn evict_stale(&mut self, now: f64) {
        let max_age = self.max_age_secs;
        let before = self.tracks.len();
        self.tracks.retain(|t| now - t.last_update <= max_age);
        let evicted = before - self.tracks.len();
        if evicted > 0 {
            tracing::debug!(evicted, live = self.tracks.len(), "evicted stale tracks");
        }
    }

    /// Greedy per-detection assignment in detection order. Each track takes at
    /// most one detection per frame, including tracks created this frame.
    fn associate(&mut self, detections: Vec<GatedDetection>, now: f64) {
        let mut matched = vec![false; self.tracks.len()];

        for detection in detections {
            if !detection.bbox.is_valid() {
                tracing::debug!(bbox = ?detection.bbox, "skipping malformed detection box");
                continue;
            }

            let mut best: Option<(usize, f32)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if matched[i] {
                    continue;
                }
                let overlap = iou(&detection.bbox, &track.last_bbox);
                if overlap > self.iou_threshold && best.map_or(true, |(_, b)| overlap > b) {
                    best = Some((i, overlap));
                }
            }

            match best {
                Some((i, _)) => {
                    self.tracks[i].push(detection, now);
                    matched[i] = true;
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track::new(id, detection, now));
                    matched.push(true);
                    tracing::debug!(track = id, "created track");
                }
            }
        }
    }

    fn resolve_identities(&mut self, roster: &[RosterEntry]) {
        for track in &mut self.tracks {
            if track.identity.is_some() || track.sample_count() < self.min_embeddings {
                continue;
            }
            let Some(probe) = track.aggregated_embedding() else {
                continue;
            };
            if let Some(found) = self.matcher.best_match(&probe, roster, self.match_threshold) {
                tracing::info!(
                    track = track.id,
                    employee = %found.employee_id,
                    confidence = found.similarity,
                    samples = track.sample_count(),
                    mean_blur = track.mean_blur_score(),
                    "track bound to employee"
                );
                track.identity = Some(found);
            }
        }
    }

    fn resolved_tracks(&self) -> Vec<ResolvedTrack> {
        self.tracks
            .iter()
            .filter_map(|t| {
                t.identity.map(|m| ResolvedTrack {
                    track_id: t.id,
                    employee_id: m.employee_id,
                    confidence: m.similarity,
                    bbox: t.last_bbox,
                })
            })
            .collect()
    }
}

/// Compute Intersection-over-Union between two bounding boxes.
///
/// Zero when the union has no area.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
