//! Per-camera processing loop: capture → model → pipeline → events + stream.

use crate::backend::EventPayload;
use crate::config::CameraConfig;
use crate::events::EventSender;
use crate::overlay::Overlay;
use crate::roster_service::RosterReceiver;
use crate::shutdown::Shutdown;
use crate::stream::FrameSlot;
use attend_camera::{encode_jpeg, CameraError, Capture, FrameSource};
use attend_core::{EmbeddingModel, FramePipeline, PipelineConfig, Roster};
use bytes::Bytes;
use chrono::Utc;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

pub const STREAM_JPEG_QUALITY: u8 = 85;

/// Channels a worker shares with the rest of the daemon.
#[derive(Clone)]
pub struct WorkerLinks {
    pub roster: RosterReceiver,
    pub events: EventSender,
    pub slot: FrameSlot,
    pub overlay: Arc<Overlay>,
}

pub struct CameraWorker<S, M> {
    camera: CameraConfig,
    capture: Capture<S>,
    model: M,
    pipeline: FramePipeline,
    roster: Arc<Roster>,
    links: WorkerLinks,
    frame_skip: u64,
    frame_count: u64,
    clock_origin: Instant,
}

impl<S: FrameSource, M: EmbeddingModel> CameraWorker<S, M> {
    pub fn new(
        camera: CameraConfig,
        capture: Capture<S>,
        model: M,
        pipeline_config: &PipelineConfig,
        frame_skip: u64,
        mut links: WorkerLinks,
    ) -> Self {
        let roster = links.roster.borrow_and_update().clone();
        let mut pipeline = FramePipeline::new(pipeline_config);
        pipeline.apply_roster(&roster);
        Self {
            camera,
            capture,
            model,
            pipeline,
            roster,
            links,
            frame_skip: frame_skip.max(1),
            frame_count: 0,
            clock_origin: Instant::now(),
        }
    }

    /// Seconds on the pipeline clock.
    fn now(&self) -> f64 {
        self.clock_origin.elapsed().as_secs_f64()
    }

    /// Connect, then process frames until shutdown. Fails only when the
    /// camera cannot be (re)connected.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), CameraError> {
        tracing::info!(
            camera = %self.camera.id,
            source = %self.camera.source,
            roster = self.roster.len(),
            "camera worker starting"
        );
        self.capture.connect().await?;

        while !shutdown.is_triggered() {
            self.step().await?;
        }
        tracing::info!(camera = %self.camera.id, "camera worker stopped");
        Ok(())
    }

    /// One loop iteration.
    pub async fn step(&mut self) -> Result<(), CameraError> {
        let Some(frame) = self.capture.next_frame().await? else {
            return Ok(());
        };
        self.refresh_roster();

        self.frame_count += 1;
        if self.frame_count % self.frame_skip != 0 {
            self.publish(&frame.image);
            return Ok(());
        }

        let now = self.now();
        let detections = match self.model.detect(&frame.image).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(camera = %self.camera.id, error = %e, "model call failed");
                self.publish(&frame.image);
                return Ok(());
            }
        };

        let outcome = self
            .pipeline
            .process(&frame.image, detections, &self.roster, now);
        tracing::debug!(
            camera = %self.camera.id,
            seq = frame.sequence,
            width = frame.width(),
            height = frame.height(),
            brightness = frame.avg_brightness(),
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "frame processed"
        );

        let present = self.pipeline.presence().present().count();
        for event in outcome.events {
            tracing::info!(
                camera = %self.camera.id,
                employee = %event.employee_id,
                kind = %event.kind,
                present,
                "presence transition"
            );
            self.links.events.submit(EventPayload {
                employee_id: event.employee_id,
                kind: event.kind,
                timestamp: Utc::now(),
                camera_id: self.camera.backend_id,
            });
        }

        let mut display = frame.image;
        self.links.overlay.annotate(&mut display, self.pipeline.tracks());
        self.publish(&display);
        Ok(())
    }

    /// Pick up a newly published roster without waiting.
    fn refresh_roster(&mut self) {
        if !self.links.roster.has_changed().unwrap_or(false) {
            return;
        }
        let roster = self.links.roster.borrow_and_update().clone();
        self.pipeline.apply_roster(&roster);
        tracing::info!(
            camera = %self.camera.id,
            entries = roster.len(),
            "roster reloaded"
        );
        self.roster = roster;
    }

    fn publish(&self, image: &RgbImage) {
        match encode_jpeg(image, STREAM_JPEG_QUALITY) {
            Ok(jpeg) => self.links.slot.publish(Bytes::from(jpeg)),
            Err(e) => tracing::warn!(camera = %self.camera.id, error = %e, "frame encode failed"),
        }
    }

    #[cfg(test)]
    fn with_clock_origin(mut self, origin: Instant) -> Self {
        self.clock_origin = origin;
        self
    }
}
