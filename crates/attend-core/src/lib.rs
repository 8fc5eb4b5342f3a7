//! attend-core: face tracking and presence decisions for attendance cameras.
//!
//! Everything downstream of the face model: quality gating, IoU tracking,
//! identity matching against the roster and IN/OUT debouncing.

pub mod config;
pub mod enhance;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod presence;
pub mod quality;
pub mod roster;
pub mod tracker;
pub mod types;

pub use config::{EnhanceConfig, PipelineConfig};
pub use matcher::{CosineMatcher, IdentityMatch, Matcher};
pub use model::{EmbeddingModel, ModelError};
pub use pipeline::{FrameOutcome, FramePipeline};
pub use presence::{PresenceRecord, PresenceTracker};
pub use quality::{QualityGate, QualityMetrics, QualityVerdict};
pub use roster::{
    EmbeddingCache, EmployeeRef, PhotoError, PhotoSource, Roster, RosterEntry, RosterError,
    RosterLoader,
};
pub use tracker::{ResolvedTrack, Track, Tracker};
pub use types::{BoundingBox, Detection, Embedding, EmployeeId, EventKind, PresenceEvent};
