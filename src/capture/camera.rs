// src/capture/camera.rs
//
// Synthetic frame source. Stands in for camera hardware: a background task
// renders a moving RGB gradient at a fixed rate and hands each frame to
// `CaptureHandle::push_frame`. Frames outside Recording are dropped by the
// handle, so the camera can run for the whole session.

use super::controller::CaptureHandle;
use crate::types::RawFrame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyntheticCameraConfig {
    pub fps: u32,
    pub width: usize,
    pub height: usize,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            width: 32,
            height: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraStatus {
    Streaming,
    /// Acquisition failed; capture continues on fallback sequences
    Degraded(String),
}

/// Handle to a running synthetic camera. Stops on `stop()` or drop.
pub struct SyntheticCamera {
    shutdown_tx: Option<mpsc::Sender<()>>,
    status: CameraStatus,
}

impl SyntheticCamera {
    pub fn start(config: SyntheticCameraConfig, handle: CaptureHandle) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
        info!(
            "🎥 Synthetic camera started: {}x{} @ {} fps",
            config.width, config.height, config.fps
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let started = tokio::time::Instant::now();
            let mut frame_index: u64 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let timestamp_ms = started.elapsed().as_secs_f64() * 1000.0;
                        let frame = render_frame(&config, frame_index, timestamp_ms);
                        handle.push_frame(frame);
                        frame_index += 1;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Synthetic camera shutdown requested after {} frames", frame_index);
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            status: CameraStatus::Streaming,
        }
    }

    /// A camera that never delivers frames. The failure is reported to the
    /// capture task, which keeps working on fallback sequences.
    pub async fn unavailable(handle: &CaptureHandle, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("🎥 Camera unavailable: {}", reason);
        if handle.report_camera_error(reason.clone()).await.is_err() {
            debug!("Capture task gone before camera error was reported");
        }
        Self {
            shutdown_tx: None,
            status: CameraStatus::Degraded(reason),
        }
    }

    pub fn status(&self) -> &CameraStatus {
        &self.status
    }

    pub fn stop(&mut self) {
        self.shutdown_tx.take();
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Diagonal RGB gradient that drifts one step per frame.
fn render_frame(config: &SyntheticCameraConfig, index: u64, timestamp_ms: f64) -> RawFrame {
    let mut data = Vec::with_capacity(config.width * config.height * 3);
    let shift = (index % 256) as usize;
    for y in 0..config.height {
        for x in 0..config.width {
            let r = ((x * 255) / config.width.max(1) + shift) % 256;
            let g = ((y * 255) / config.height.max(1) + shift) % 256;
            let b = (r + g) / 2;
            data.extend_from_slice(&[r as u8, g as u8, b as u8]);
        }
    }
    RawFrame {
        data,
        width: config.width,
        height: config.height,
        timestamp_ms,
    }
}
