// src/frame_buffer.rs
//
// Per-attempt frame accumulator.
//
// Holds the feature vectors captured during one recording window, in
// arrival order. The capture state machine is the only writer: it clears
// the buffer when a new attempt starts and drains it when the window
// closes.

use crate::types::FrameVector;
use tracing::debug;

#[derive(Debug, Default)]
pub struct FrameBuffer {
    frames: Vec<FrameVector>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: FrameVector) {
        self.frames.push(frame);
    }

    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            debug!("FrameBuffer: discarding {} frames", self.frames.len());
        }
        self.frames.clear();
    }

    /// Take every buffered frame, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<FrameVector> {
        std::mem::take(&mut self.frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
