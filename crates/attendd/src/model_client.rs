//! HTTP client for the external face model service.

use attend_camera::encode_jpeg;
use attend_core::{BoundingBox, Detection, Embedding, EmbeddingModel, ModelError};
use image::RgbImage;
use serde::Deserialize;
use std::time::Duration;

const UPLOAD_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<WireFace>,
}

#[derive(Debug, Deserialize)]
struct WireFace {
    bbox: [f32; 4],
    embedding: Vec<f32>,
    #[serde(default)]
    score: f32,
}

/// `POST {url}/detect` with a JPEG body.
#[derive(Clone)]
pub struct HttpModel {
    client: reqwest::Client,
    detect_url: String,
}

impl HttpModel {
    pub fn new(model_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Request(e.to_string()))?;
        Ok(Self {
            client,
            detect_url: format!("{}/detect", model_url.trim_end_matches('/')),
        })
    }
}

impl EmbeddingModel for HttpModel {
    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let body = encode_jpeg(image, UPLOAD_JPEG_QUALITY)
            .map_err(|e| ModelError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&self.detect_url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ModelError::Request(format!(
                "HTTP {} from {}",
                response.status().as_u16(),
                self.detect_url
            )));
        }
        let raw = response
            .bytes()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        parse_detections(&raw)
    }
}

/// Decode a detect response. Faces with an empty embedding are dropped.
pub fn parse_detections(raw: &[u8]) -> Result<Vec<Detection>, ModelError> {
    let parsed: DetectResponse =
        serde_json::from_slice(raw).map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

    let total = parsed.faces.len();
    let detections: Vec<Detection> = parsed
        .faces
        .into_iter()
        .filter(|f| !f.embedding.is_empty())
        .map(|f| {
            let [x1, y1, x2, y2] = f.bbox;
            Detection {
                bbox: BoundingBox::new(x1, y1, x2, y2),
                embedding: Embedding::new(f.embedding),
                score: f.score,
            }
        })
        .collect();
    if detections.len() < total {
        tracing::debug!(
            dropped = total - detections.len(),
            "model returned faces without embeddings"
        );
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections() {
        let raw = br#"{"faces":[{"bbox":[10,20,60,90],"embedding":[0.6,0.8],"score":0.97}]}"#;
        let detections = parse_detections(raw).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(10.0, 20.0, 60.0, 90.0));
        assert_eq!(detections[0].embedding.values, vec![0.6, 0.8]);
        assert!((detections[0].score - 0.97).abs() < 1e-6);
    }

    #[test]
    fn test_parse_no_faces() {
        assert!(parse_detections(br#"{"faces":[]}"#).unwrap().is_empty());
        assert!(parse_detections(b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_drops_empty_embeddings() {
        let raw = br#"{"faces":[{"bbox":[0,0,1,1],"embedding":[]},{"bbox":[0,0,5,5],"embedding":[1.0]}]}"#;
        let detections = parse_detections(raw).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].score, 0.0);
    }

    #[test]
    fn test_parse_malformed() {
        let err = parse_detections(b"<html>").unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
        assert!(parse_detections(br#"{"faces":[{"bbox":[1,2,3],"embedding":[1]}]}"#).is_err());
    }

    #[test]
    fn test_detect_url() {
        let model = HttpModel::new("http://model:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(model.detect_url, "http://model:8000/detect");
    }
}
