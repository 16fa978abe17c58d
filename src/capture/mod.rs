// src/capture/mod.rs
//
// Capture-and-predict orchestration: countdown, fixed recording window,
// sequence assembly and a single prediction request per cycle.

pub mod camera;
pub mod controller;
pub mod metrics;
pub mod state_machine;

pub use camera::{CameraStatus, SyntheticCamera, SyntheticCameraConfig};
pub use controller::{spawn, CaptureDeps, CaptureError, CaptureHandle, CaptureModule, ResultSink};
pub use metrics::{CaptureMetrics, MetricsSummary};
pub use state_machine::{CaptureMachine, CaptureNotice, CaptureState};
