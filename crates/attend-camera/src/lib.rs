//! attend-camera: frame capture for attendance cameras.
//!
//! Provides an HTTP snapshot camera and a capture wrapper that counts
//! consecutive read failures and reconnects with backoff.

pub mod camera;
pub mod frame;

pub use camera::{CameraError, Capture, FrameSource, ReconnectPolicy, SnapshotCamera};
pub use frame::{encode_jpeg, Frame};
