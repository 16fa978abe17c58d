// src/preprocessing.rs
//
// Frame → feature vector conversion. The capture task only relies on the
// `FramePreprocessor` trait; `GridPreprocessor` is the default shim used
// by the binary and by tests.

use crate::types::{FrameVector, PreprocessConfig, RawFrame};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("frame has zero width or height")]
    EmptyFrame,
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },
}

/// Converts one raw camera frame into a fixed-size feature vector.
pub trait FramePreprocessor: Send + Sync {
    fn preprocess(&self, frame: &RawFrame) -> Result<FrameVector, PreprocessError>;

    /// Number of features produced per frame
    fn feature_len(&self) -> usize;
}

/// Samples the frame on a coarse grid and emits per-cell luminance in [0, 1].
pub struct GridPreprocessor {
    grid_width: usize,
    grid_height: usize,
}

impl GridPreprocessor {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            grid_width: config.grid_width.max(1),
            grid_height: config.grid_height.max(1),
        }
    }
}

impl FramePreprocessor for GridPreprocessor {
    fn preprocess(&self, frame: &RawFrame) -> Result<FrameVector, PreprocessError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(PreprocessError::EmptyFrame);
        }
        let expected = frame.width * frame.height * 3;
        if frame.data.len() < expected {
            return Err(PreprocessError::ShortFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        let resized = resize_bilinear(
            &frame.data,
            frame.width,
            frame.height,
            self.grid_width,
            self.grid_height,
        );

        Ok(resized
            .chunks_exact(3)
            .map(|px| {
                let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                luma / 255.0
            })
            .collect())
    }

    fn feature_len(&self) -> usize {
        self.grid_width * self.grid_height
    }
}

/// Bilinear image resize
fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];

    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;

            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);

            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}
