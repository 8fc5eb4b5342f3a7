//! Frame acquisition: the [`FrameSource`] seam, an HTTP snapshot camera and
//! a failure-counting [`Capture`] wrapper that drives reconnects.

use crate::frame::Frame;
use image::RgbImage;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera request failed: {0}")]
    Request(String),
    #[error("camera returned HTTP {0}")]
    Status(u16),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("cannot connect to camera after {attempts} attempts")]
    ConnectExhausted { attempts: u32 },
}

/// Anything that can hand out RGB frames and re-establish its connection.
pub trait FrameSource {
    fn read_frame(&mut self) -> impl Future<Output = Result<RgbImage, CameraError>> + Send;

    /// Drop and re-open the underlying connection. Succeeds only once a
    /// frame can be read again.
    fn reconnect(&mut self) -> impl Future<Output = Result<(), CameraError>> + Send;
}

/// Camera exposing a still-JPEG endpoint (`GET <url>` → one image).
pub struct SnapshotCamera {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl SnapshotCamera {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CameraError> {
        Ok(Self {
            url: url.into(),
            timeout,
            client: build_client(timeout)?,
        })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, CameraError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CameraError::Request(e.to_string()))
}

impl FrameSource for SnapshotCamera {
    async fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CameraError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CameraError::Status(response.status().as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| CameraError::Request(e.to_string()))?;
        let image = image::load_from_memory(&body)
            .map_err(|e| CameraError::Decode(e.to_string()))?
            .to_rgb8();
        Ok(image)
    }

    async fn reconnect(&mut self) -> Result<(), CameraError> {
        self.client = build_client(self.timeout)?;
        let probe = self.read_frame().await?;
        tracing::info!(
            url = %self.url,
            width = probe.width(),
            height = probe.height(),
            "camera connected"
        );
        Ok(())
    }
}

/// Failure thresholds and pauses used by [`Capture`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive read failures that trigger a reconnect.
    pub max_failures: u32,
    /// Pause after a single failed read.
    pub failure_pause: Duration,
    /// Pause before reconnecting after too many failures.
    pub reconnect_pause: Duration,
    /// Connect attempts before giving up.
    pub connect_attempts: u32,
    /// Backoff after the first failed connect; doubles each attempt.
    pub initial_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_failures: 10,
            failure_pause: Duration::from_millis(500),
            reconnect_pause: Duration::from_secs(2),
            connect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Wraps a [`FrameSource`] with consecutive-failure counting.
pub struct Capture<S> {
    source: S,
    policy: ReconnectPolicy,
    failures: u32,
    sequence: u64,
}

impl<S: FrameSource> Capture<S> {
    pub fn new(source: S, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            failures: 0,
            sequence: 0,
        }
    }

    /// Connect with exponential backoff between attempts.
    ///
    /// Only error path that ends a camera pipeline.
    pub async fn connect(&mut self) -> Result<(), CameraError> {
        let attempts = self.policy.connect_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;

        for attempt in 1..=attempts {
            tracing::info!(attempt, max = attempts, "connecting to camera");
            match self.source.reconnect().await {
                Ok(()) => {
                    self.failures = 0;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, max = attempts, error = %e, "camera connect failed");
                }
            }
            if attempt < attempts {
                tracing::debug!(wait_ms = backoff.as_millis() as u64, "retrying camera connect");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(CameraError::ConnectExhausted { attempts })
    }

    /// Read one frame.
    ///
    /// `Ok(None)` is a transient failure that has already been paused for;
    /// the caller simply tries again. After `max_failures` in a row the
    /// source is reconnected, and only an exhausted reconnect is an error.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.source.read_frame().await {
            Ok(image) => {
                self.failures = 0;
                self.sequence += 1;
                Ok(Some(Frame {
                    image,
                    sequence: self.sequence,
                }))
            }
            Err(e) => {
                self.failures += 1;
                tracing::warn!(
                    failures = self.failures,
                    max = self.policy.max_failures,
                    error = %e,
                    "failed to read frame"
                );
                if self.failures >= self.policy.max_failures {
                    tracing::error!("too many read failures, reconnecting camera");
                    tokio::time::sleep(self.policy.reconnect_pause).await;
                    self.connect().await?;
                } else {
                    tokio::time::sleep(self.policy.failure_pause).await;
                }
                Ok(None)
            }
        }
    }
}
