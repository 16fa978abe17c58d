// src/capture/state_machine.rs
//
// Capture state machine.
//
//   Idle ──start──▶ Countdown(N) ──tick──▶ … ──tick──▶ Countdown(1)
//                        │                                  │ tick
//                        │ cancel                           ▼
//                        └──────────────▶ Idle ◀──cancel── Recording
//                                          ▲                │ duration elapsed
//                                          │ settled        ▼
//                                          └──────────── Submitting
//
// The machine owns the frame buffer and decides every transition; it never
// touches a clock or the network. Side effects (arming timers, sending the
// request, invoking the result sink) come back as `CaptureEffect`s for the
// controller to carry out, so the transition logic is fully synchronous.

use crate::api::ApiError;
use crate::frame_buffer::FrameBuffer;
use crate::prediction::PredictionRequest;
use crate::sequence::SequenceBuilder;
use crate::types::{FrameVector, Label, PredictionResult};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Remaining ticks before recording starts
    Countdown(u32),
    Recording,
    Submitting,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Countdown(_) => "countdown",
            Self::Recording => "recording",
            Self::Submitting => "submitting",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Cancel is only honoured before the request goes out
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Countdown(_) | Self::Recording)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Countdown(n) => write!(f, "countdown({})", n),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Inputs accepted by the machine. Timer expiries are inputs like any other.
#[derive(Debug)]
pub enum CaptureInput {
    /// User pressed start; carries the label selected at that moment
    Start(Option<Label>),
    Tick,
    Frame(FrameVector),
    DurationElapsed,
    Settled(Result<PredictionResult, ApiError>),
    Cancel,
    CameraError(String),
}

/// User-facing notices.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureNotice {
    NoLabelSelected,
    Busy(CaptureState),
    CameraDegraded(String),
    FallbackSequence,
    SubmissionFailed(String),
}

impl fmt::Display for CaptureNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLabelSelected => f.write_str("Select a sign to practice first"),
            Self::Busy(state) => write!(f, "A capture is already in progress ({})", state),
            Self::CameraDegraded(reason) => {
                write!(f, "Camera unavailable ({}); continuing in simulation mode", reason)
            }
            Self::FallbackSequence => f.write_str("No frames captured; submitted simulated data"),
            Self::SubmissionFailed(reason) => write!(f, "Prediction failed: {}", reason),
        }
    }
}

#[derive(Debug)]
pub enum CaptureEffect {
    ArmCountdown,
    /// Disarm the countdown and arm the one-shot recording timer
    ArmRecording,
    DisarmTimers,
    Submit(PredictionRequest),
    Deliver(PredictionResult),
    Notify(CaptureNotice),
}

/// What the machine holds for one start-to-result cycle.
struct ActiveCapture {
    label: Label,
    buffer: FrameBuffer,
}

pub struct CaptureMachine {
    state: CaptureState,
    active: Option<ActiveCapture>,
    countdown_ticks: u32,
    builder: SequenceBuilder,
}

impl CaptureMachine {
    pub fn new(countdown_ticks: u32, builder: SequenceBuilder) -> Self {
        Self {
            state: CaptureState::Idle,
            active: None,
            countdown_ticks: countdown_ticks.max(1),
            builder,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn accepts_frames(&self) -> bool {
        self.state == CaptureState::Recording
    }

    /// Label of the cycle in progress
    pub fn label(&self) -> Option<&Label> {
        self.active.as_ref().map(|a| &a.label)
    }

    pub fn buffered_frames(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.buffer.len())
    }

    pub fn apply(&mut self, input: CaptureInput) -> Vec<CaptureEffect> {
        match input {
            CaptureInput::Start(label) => self.on_start(label),
            CaptureInput::Tick => self.on_tick(),
            CaptureInput::Frame(frame) => {
                self.on_frame(frame);
                Vec::new()
            }
            CaptureInput::DurationElapsed => self.on_duration_elapsed(),
            CaptureInput::Settled(outcome) => self.on_settled(outcome),
            CaptureInput::Cancel => self.on_cancel(),
            CaptureInput::CameraError(reason) => {
                warn!("📷 Camera degraded: {}", reason);
                vec![CaptureEffect::Notify(CaptureNotice::CameraDegraded(reason))]
            }
        }
    }

    /// Drop any cycle in progress without submitting. Used on teardown.
    pub fn reset(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.buffer.clear();
        }
        self.active = None;
        self.state = CaptureState::Idle;
    }

    fn on_start(&mut self, label: Option<Label>) -> Vec<CaptureEffect> {
        if !self.state.is_idle() {
            debug!("Start ignored while {}", self.state);
            return vec![CaptureEffect::Notify(CaptureNotice::Busy(self.state))];
        }
        let Some(label) = label else {
            warn!("Start requested with no label selected");
            return vec![CaptureEffect::Notify(CaptureNotice::NoLabelSelected)];
        };

        info!("▶ Capture started for \"{}\" ({})", label.name, label.id);
        self.active = Some(ActiveCapture {
            label,
            buffer: FrameBuffer::new(),
        });
        self.state = CaptureState::Countdown(self.countdown_ticks);
        vec![CaptureEffect::ArmCountdown]
    }

    fn on_tick(&mut self) -> Vec<CaptureEffect> {
        match self.state {
            CaptureState::Countdown(n) if n > 1 => {
                self.state = CaptureState::Countdown(n - 1);
                debug!("Countdown {}", n - 1);
                Vec::new()
            }
            CaptureState::Countdown(_) => {
                if let Some(active) = self.active.as_mut() {
                    active.buffer.clear();
                }
                self.state = CaptureState::Recording;
                info!("⏺ Recording");
                vec![CaptureEffect::ArmRecording]
            }
            other => {
                debug!("Stale tick ignored while {}", other);
                Vec::new()
            }
        }
    }

    fn on_frame(&mut self, frame: FrameVector) {
        if self.state != CaptureState::Recording {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.buffer.push(frame);
        }
    }

    fn on_duration_elapsed(&mut self) -> Vec<CaptureEffect> {
        if self.state != CaptureState::Recording {
            debug!("Stale recording expiry ignored while {}", self.state);
            return Vec::new();
        }
        let Some(active) = self.active.as_mut() else {
            self.state = CaptureState::Idle;
            return vec![CaptureEffect::DisarmTimers];
        };

        let frames = active.buffer.drain();
        let sequence = self.builder.build(&frames);
        info!(
            "⏹ Recording finished: {} frames → {} values{}",
            frames.len(),
            sequence.len(),
            if sequence.is_fallback() { " (fallback)" } else { "" }
        );

        let mut effects = vec![CaptureEffect::DisarmTimers];
        if sequence.is_fallback() {
            effects.push(CaptureEffect::Notify(CaptureNotice::FallbackSequence));
        }
        effects.push(CaptureEffect::Submit(PredictionRequest {
            sequence: sequence.into_values(),
            expected_label: active.label.name.clone(),
        }));
        self.state = CaptureState::Submitting;
        effects
    }

    fn on_settled(
        &mut self,
        outcome: Result<PredictionResult, ApiError>,
    ) -> Vec<CaptureEffect> {
        if self.state != CaptureState::Submitting {
            warn!("Prediction settled while {}; dropping outcome", self.state);
            return Vec::new();
        }
        self.active = None;
        self.state = CaptureState::Idle;

        match outcome {
            Ok(result) => {
                info!("✓ Prediction received");
                vec![CaptureEffect::Deliver(result)]
            }
            Err(e) => {
                warn!("✗ Prediction failed: {}", e);
                vec![CaptureEffect::Notify(CaptureNotice::SubmissionFailed(
                    e.to_string(),
                ))]
            }
        }
    }

    fn on_cancel(&mut self) -> Vec<CaptureEffect> {
        if !self.state.is_cancellable() {
            debug!("Cancel ignored while {}", self.state);
            return Vec::new();
        }
        info!("■ Capture cancelled during {}", self.state);
        self.reset();
        vec![CaptureEffect::DisarmTimers]
    }
}
