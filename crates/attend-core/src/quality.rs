//! Per-detection quality gate.
//!
//! Blocks faces that are too small (subject far from the camera) or too
//! blurry (motion or focus blur) before they reach tracking and matching.

use crate::config::PipelineConfig;
use crate::types::BoundingBox;
use image::{imageops, GrayImage, RgbImage};

/// Diagnostics computed for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityMetrics {
    pub height: f32,
    pub width: f32,
    /// Variance of the Laplacian of the grayscale crop. Higher = sharper.
    pub blur_score: f64,
    /// Mean grayscale level (0–255). Informational only.
    pub brightness: f64,
}

/// Outcome of gating one detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityVerdict {
    pub accepted: bool,
    /// `None` when the crop could not be processed at all.
    pub metrics: Option<QualityMetrics>,
}

impl QualityVerdict {
    fn rejected_without_metrics() -> Self {
        Self {
            accepted: false,
            metrics: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    min_face_height: f32,
    min_blur_variance: f64,
}

impl QualityGate {
    pub fn new(min_face_height: f32, min_blur_variance: f64) -> Self {
        Self {
            min_face_height,
            min_blur_variance,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.min_face_height, config.min_blur_variance)
    }

    /// Gate an already-cropped grayscale face.
    ///
    /// Accepts iff box height ≥ minimum AND blur score ≥ minimum. Never fails:
    /// anything that cannot be measured is a rejection without metrics.
    pub fn assess(&self, crop: &GrayImage, bbox: &BoundingBox) -> QualityVerdict {
        if !bbox.is_valid() {
            tracing::debug!(?bbox, "face rejected: malformed box");
            return QualityVerdict::rejected_without_metrics();
        }
        let (Some(blur_score), Some(brightness)) =
            (laplacian_variance(crop), mean_brightness(crop))
        else {
            tracing::debug!(
                width = crop.width(),
                height = crop.height(),
                "face rejected: empty crop"
            );
            return QualityVerdict::rejected_without_metrics();
        };

        let metrics = QualityMetrics {
            height: bbox.height(),
            width: bbox.width(),
            blur_score,
            brightness,
        };

        if metrics.height < self.min_face_height {
            tracing::debug!(
                height = metrics.height,
                min = self.min_face_height,
                "face rejected: too small"
            );
            return QualityVerdict {
                accepted: false,
                metrics: Some(metrics),
            };
        }

        if metrics.blur_score < self.min_blur_variance {
            tracing::debug!(
                blur = metrics.blur_score,
                min = self.min_blur_variance,
                "face rejected: too blurry"
            );
            return QualityVerdict {
                accepted: false,
                metrics: Some(metrics),
            };
        }

        tracing::debug!(
            height = metrics.height,
            blur = metrics.blur_score,
            brightness = metrics.brightness,
            "face accepted"
        );
        QualityVerdict {
            accepted: true,
            metrics: Some(metrics),
        }
    }

    /// Crop `bbox` out of a full RGB frame and gate it.
    pub fn assess_in_frame(&self, frame: &RgbImage, bbox: &BoundingBox) -> QualityVerdict {
        let Some((x, y, w, h)) = bbox.clip_to(frame.width(), frame.height()) else {
            tracing::debug!(?bbox, "face rejected: box outside frame");
            return QualityVerdict::rejected_without_metrics();
        };
        let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
        let gray = imageops::grayscale(&crop);
        self.assess(&gray, bbox)
    }
}

/// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
fn reflect101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let i = if i < 0 { -i } else { i };
    let i = if i >= n { 2 * n - 2 - i } else { i };
    i as usize
}

/// Population variance of the 4-neighbour Laplacian of a grayscale image.
///
/// Kernel `[[0,1,0],[1,-4,1],[0,1,0]]`, reflect-101 borders, f64 accumulation.
/// Returns `None` for an empty image.
pub fn laplacian_variance(gray: &GrayImage) -> Option<f64> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w == 0 || h == 0 {
        return None;
    }

    let px = |x: i64, y: i64| -> f64 {
        gray.get_pixel(reflect101(x, w) as u32, reflect101(y, h) as u32).0[0] as f64
    };

    let n = (w * h) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n;
    Some((sum_sq / n - mean * mean).max(0.0))
}

/// Mean grayscale level. `None` for an empty image.
pub fn mean_brightness(gray: &GrayImage) -> Option<f64> {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return None;
    }
    Some(pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64)
}
