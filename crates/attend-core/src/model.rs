//! Seam to the external face detection + embedding model.

use crate::types::Detection;
use image::RgbImage;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
}

/// An opaque face model: given an image, report every face with its box and embedding.
pub trait EmbeddingModel {
    fn detect(
        &self,
        image: &RgbImage,
    ) -> impl Future<Output = Result<Vec<Detection>, ModelError>> + Send;
}
