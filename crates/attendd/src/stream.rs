//! Latest-frame slot and the per-camera MJPEG/health HTTP server.

use crate::shutdown::Shutdown;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SERVICE_NAME: &str = "attendd";
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const EMPTY_POLL: Duration = Duration::from_millis(100);

/// Most recent JPEG for one camera. Writers replace, readers clone the handle.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Bytes>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, jpeg: Bytes) {
        *self.lock() = Some(jpeg);
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.lock().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Bytes>> {
        // A panicking writer cannot leave a half-written `Option<Bytes>`.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
struct StreamState {
    slot: FrameSlot,
    camera_id: String,
    /// Open `/video_feed` responses end when this fires.
    shutdown: Shutdown,
}

pub fn router(slot: FrameSlot, camera_id: &str, shutdown: Shutdown) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/health", get(health))
        .with_state(StreamState {
            slot,
            camera_id: camera_id.to_string(),
            shutdown,
        })
}

/// Serve `router` on `addr` until shutdown.
pub async fn serve(addr: SocketAddr, router: Router, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "stream server listening");
    serve_on(listener, router, shutdown).await
}

async fn serve_on(
    listener: tokio::net::TcpListener,
    router: Router,
    mut shutdown: Shutdown,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

async fn video_feed(State(state): State<StreamState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(mjpeg_stream(state.slot, state.shutdown)),
    )
}

async fn health(State(state): State<StreamState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "streaming": state.slot.is_streaming(),
        "cameraId": state.camera_id,
        "service": SERVICE_NAME,
    }))
}

/// Multipart stream of the slot's frames, about 30 per second, until shutdown.
fn mjpeg_stream(
    slot: FrameSlot,
    mut shutdown: Shutdown,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold((slot, true), |(slot, first)| async move {
        if !first {
            tokio::time::sleep(FRAME_INTERVAL).await;
        }
        let jpeg = loop {
            if let Some(jpeg) = slot.latest() {
                break jpeg;
            }
            tokio::time::sleep(EMPTY_POLL).await;
        };
        Some((Ok(multipart_part(&jpeg)), (slot, false)))
    })
    .take_until(async move { shutdown.wait().await })
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 48);
    part.put_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;

    #[test]
    fn test_slot_replace_and_read() {
        let slot = FrameSlot::new();
        assert!(!slot.is_streaming());
        assert!(slot.latest().is_none());

        slot.publish(Bytes::from_static(b"one"));
        slot.publish(Bytes::from_static(b"two"));
        assert_eq!(slot.latest().unwrap(), Bytes::from_static(b"two"));
        assert!(slot.clone().is_streaming());
    }

    #[test]
    fn test_multipart_part_framing() {
        let part = multipart_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }

    #[tokio::test]
    async fn test_stream_waits_for_first_frame() {
        let slot = FrameSlot::new();
        let publisher = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            publisher.publish(Bytes::from_static(b"late"));
        });

        let (_trigger, shutdown) = shutdown::channel();
        let mut stream = Box::pin(mjpeg_stream(slot, shutdown));
        let first = stream.next().await.unwrap().unwrap();
        assert!(first.ends_with(b"late\r\n"));
    }

    #[tokio::test]
    async fn test_stream_follows_latest_frame() {
        let slot = FrameSlot::new();
        slot.publish(Bytes::from_static(b"a"));
        let (_trigger, shutdown) = shutdown::channel();
        let mut stream = Box::pin(mjpeg_stream(slot.clone(), shutdown));
        assert!(stream.next().await.unwrap().unwrap().ends_with(b"a\r\n"));
        slot.publish(Bytes::from_static(b"b"));
        assert!(stream.next().await.unwrap().unwrap().ends_with(b"b\r\n"));
    }

    #[tokio::test]
    async fn test_health_reports_streaming() {
        let slot = FrameSlot::new();
        let (_trigger, shutdown) = shutdown::channel();
        let state = StreamState {
            slot: slot.clone(),
            camera_id: "lobby".into(),
            shutdown,
        };
        let Json(body) = health(State(state.clone())).await;
        assert_eq!(body["streaming"], false);
        assert_eq!(body["cameraId"], "lobby");
        assert_eq!(body["service"], "attendd");

        slot.publish(Bytes::from_static(b"x"));
        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["streaming"], true);
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let slot = FrameSlot::new();
        slot.publish(Bytes::from_static(b"a"));
        let (trigger, shutdown) = shutdown::channel();
        let mut stream = Box::pin(mjpeg_stream(slot, shutdown));
        assert!(stream.next().await.is_some());

        trigger.trigger();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_server_stops_with_viewer_connected() {
        let slot = FrameSlot::new();
        slot.publish(Bytes::from_static(b"frame"));
        let (trigger, shutdown) = shutdown::channel();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(slot, "lobby", shutdown.clone());
        let server = tokio::spawn(serve_on(listener, app, shutdown));

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let mut viewer = client
            .get(format!("http://{addr}/video_feed"))
            .send()
            .await
            .unwrap();
        assert!(viewer.status().is_success());
        let first = viewer.chunk().await.unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\n"));

        trigger.trigger();
        let stopped = tokio::time::timeout(Duration::from_secs(3), server).await;
        assert!(stopped.is_ok(), "server kept running for an open viewer");
        stopped.unwrap().unwrap().unwrap();
    }
}
