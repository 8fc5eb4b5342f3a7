use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Once;

/// Backend identifier of an employee on the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub i64);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned face box in pixel space, corners `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Finite coordinates with strictly positive width and height.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Integer pixel rectangle `(x, y, width, height)` of this box clipped to a
    /// `frame_width × frame_height` image. `None` when nothing of the box is inside.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        if !self.is_valid() {
            return None;
        }
        let x1 = self.x1.floor().clamp(0.0, frame_width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, frame_height as f32) as u32;
        let x2 = self.x2.floor().clamp(0.0, frame_width as f32) as u32;
        let y2 = self.y2.floor().clamp(0.0, frame_height as f32) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Face embedding vector (fixed length per model, usually unit-normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. For unit vectors this
    /// is the plain dot product; a zero vector is similar to nothing (0.0).
    /// Embeddings of different dimension come from different models and are
    /// never similar (0.0).
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            static DIM_MISMATCH: Once = Once::new();
            DIM_MISMATCH.call_once(|| {
                tracing::warn!(
                    left = self.dim(),
                    right = other.dim(),
                    "comparing embeddings of different dimension; is the roster cache stale?"
                );
            });
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Unweighted arithmetic mean of `samples`.
    ///
    /// Samples whose dimension differs from the first one are ignored.
    /// Returns `None` for an empty slice.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.dim();
        let mut sum = vec![0.0f32; dim];
        let mut count = 0usize;

        for sample in samples.iter().filter(|s| s.dim() == dim) {
            for (acc, v) in sum.iter_mut().zip(sample.values.iter()) {
                *acc += v;
            }
            count += 1;
        }

        let n = count as f32;
        Some(Embedding {
            values: sum.into_iter().map(|v| v / n).collect(),
        })
    }
}

/// One face reported by the embedding model for a single image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    /// Detector confidence, informational only.
    #[serde(default)]
    pub score: f32,
}

/// Direction of a presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::In => "IN",
            EventKind::Out => "OUT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decided IN/OUT transition, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub employee_id: EmployeeId,
    pub kind: EventKind,
    /// Pipeline clock reading (seconds) at which the transition fired.
    pub at: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        let a = Embedding::new(vec![0.5, 0.0]);
        let b = Embedding::new(vec![3.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
        assert_eq!(b.similarity(&a), 0.0);
    }

    #[test]
    fn test_mean_of_samples() {
        let samples = vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![0.0, 1.0]),
        ];
        let mean = Embedding::mean(&samples).unwrap();
        assert_eq!(mean.values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_mean_skips_mismatched_dimensions() {
        let samples = vec![
            Embedding::new(vec![1.0, 1.0]),
            Embedding::new(vec![9.0, 9.0, 9.0]),
            Embedding::new(vec![3.0, 3.0]),
        ];
        let mean = Embedding::mean(&samples).unwrap();
        assert_eq!(mean.values, vec![2.0, 2.0]);
    }

    #[test]
    fn test_mean_empty() {
        assert!(Embedding::mean(&[]).is_none());
    }

    #[test]
    fn test_bbox_validity() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(10.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BoundingBox::new(f32::NAN, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::INFINITY, 10.0).is_valid());
    }

    #[test]
    fn test_bbox_clip_to_frame() {
        let b = BoundingBox::new(-5.0, 10.0, 50.0, 200.0);
        assert_eq!(b.clip_to(40, 100), Some((0, 10, 40, 90)));
    }

    #[test]
    fn test_bbox_clip_outside_frame() {
        let b = BoundingBox::new(120.0, 120.0, 150.0, 150.0);
        assert_eq!(b.clip_to(100, 100), None);
    }

    #[test]
    fn test_event_kind_wire_format() {
        assert_eq!(serde_json::to_string(&EventKind::In).unwrap(), "\"IN\"");
        assert_eq!(serde_json::to_string(&EventKind::Out).unwrap(), "\"OUT\"");
    }
}
