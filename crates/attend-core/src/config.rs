//! Tunable thresholds for the recognition pipeline.

use serde::{Deserialize, Serialize};

/// Thresholds shared by the quality gate, tracker, matcher and presence logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum face box height in pixels.
    pub min_face_height: f32,
    /// Minimum variance of the Laplacian over the grayscale face crop.
    pub min_blur_variance: f64,
    /// A detection joins a track only when IoU with its last box exceeds this.
    pub iou_threshold: f32,
    /// Accepted samples a track needs before identity matching is attempted.
    pub min_embeddings_per_track: usize,
    /// Tracks not updated for longer than this are evicted.
    pub track_max_age_secs: f64,
    /// Cosine similarity a roster entry must exceed to be a match.
    pub match_threshold: f32,
    /// ABSENT → PRESENT debounce, measured from the last state change.
    pub in_threshold_secs: f64,
    /// PRESENT → ABSENT debounce, measured from the last recognition.
    pub out_threshold_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_face_height: 20.0,
            min_blur_variance: 50.0,
            iou_threshold: 0.3,
            min_embeddings_per_track: 2,
            track_max_age_secs: 2.0,
            match_threshold: 0.2,
            in_threshold_secs: 1.0,
            out_threshold_secs: 10.0,
        }
    }
}

impl PipelineConfig {
    /// Check that every threshold is finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        let checks: [(&str, f64); 7] = [
            ("min_face_height", self.min_face_height as f64),
            ("min_blur_variance", self.min_blur_variance),
            ("iou_threshold", self.iou_threshold as f64),
            ("track_max_age_secs", self.track_max_age_secs),
            ("match_threshold", self.match_threshold as f64),
            ("in_threshold_secs", self.in_threshold_secs),
            ("out_threshold_secs", self.out_threshold_secs),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        if self.min_embeddings_per_track == 0 {
            return Err("min_embeddings_per_track must be at least 1".into());
        }
        Ok(())
    }
}

/// Filter pipeline applied to roster photos before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub enabled: bool,
    /// CLAHE clip limit, in multiples of the uniform bin height.
    pub clahe_clip_limit: f32,
    /// Denoise strength; 0 disables the denoise step.
    pub denoise_strength: u32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clahe_clip_limit: 2.0,
            denoise_strength: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let config = PipelineConfig {
            out_threshold_secs: -1.0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("out_threshold_secs"), "{err}");
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let config = PipelineConfig {
            iou_threshold: f32::NAN,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_embeddings_per_track_rejected() {
        let config = PipelineConfig {
            min_embeddings_per_track: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"in_threshold_secs": 3.5}"#).unwrap();
        assert_eq!(config.in_threshold_secs, 3.5);
        assert_eq!(config.min_embeddings_per_track, 2);
    }
}
