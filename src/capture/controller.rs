// src/capture/controller.rs
//
// Async driver for `CaptureMachine`.
//
// One tokio task owns the machine and serialises every input through a
// single `select!`: user commands, camera frames, timer expiries and the
// settlement of the in-flight prediction. Each input is applied to
// completion before the next one is polled, so a timer can never fire
// into a half-finished transition.
//
// Timers live in `SessionTimers`, created when a capture starts and dropped
// when it returns to Idle. Dropping the value releases both timers, which
// is how cancel, expiry and teardown all clean up.

use super::metrics::CaptureMetrics;
use super::state_machine::{CaptureEffect, CaptureInput, CaptureMachine, CaptureNotice, CaptureState};
use crate::api::ApiError;
use crate::prediction::{PredictionRequest, PredictionSubmitter};
use crate::preprocessing::FramePreprocessor;
use crate::sequence::SequenceBuilder;
use crate::store::LabelSource;
use crate::types::{CaptureConfig, PredictionResult, RawFrame};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture task has stopped")]
    Closed,
}

/// Receives successful predictions.
pub trait ResultSink: Send + 'static {
    fn deliver(&mut self, result: PredictionResult);
}

impl<F> ResultSink for F
where
    F: FnMut(PredictionResult) + Send + 'static,
{
    fn deliver(&mut self, result: PredictionResult) {
        self(result)
    }
}

/// Collaborators the capture task depends on.
pub struct CaptureDeps {
    pub labels: Arc<dyn LabelSource>,
    pub preprocessor: Arc<dyn FramePreprocessor>,
    pub submitter: Arc<dyn PredictionSubmitter>,
    pub sink: Box<dyn ResultSink>,
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    CameraError(String),
    Shutdown,
}

/// Cloneable front end for the capture task: user actions, the camera
/// callback and the observable state.
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::Sender<Command>,
    frames: mpsc::Sender<RawFrame>,
    state: watch::Receiver<CaptureState>,
    metrics: CaptureMetrics,
}

impl CaptureHandle {
    pub async fn start(&self) -> Result<(), CaptureError> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<(), CaptureError> {
        self.send(Command::Stop).await
    }

    pub async fn report_camera_error(&self, reason: impl Into<String>) -> Result<(), CaptureError> {
        self.send(Command::CameraError(reason.into())).await
    }

    /// Tear the module down: timers are released, an in-flight request is
    /// abandoned and no further results are delivered.
    pub async fn shutdown(&self) -> Result<(), CaptureError> {
        self.send(Command::Shutdown).await
    }

    /// Camera callback. Never blocks; returns false when the frame was
    /// dropped (not recording, queue full, or task gone).
    pub fn push_frame(&self, frame: RawFrame) -> bool {
        if *self.state.borrow() != CaptureState::Recording {
            self.metrics.inc(&self.metrics.frames_dropped);
            return false;
        }
        match self.frames.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Frame queue full, dropping frame");
                self.metrics.inc(&self.metrics.frames_dropped);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    pub fn metrics(&self) -> &CaptureMetrics {
        &self.metrics
    }

    async fn send(&self, command: Command) -> Result<(), CaptureError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CaptureError::Closed)
    }
}

/// A running capture task.
pub struct CaptureModule {
    pub handle: CaptureHandle,
    pub notices: mpsc::UnboundedReceiver<CaptureNotice>,
    pub task: JoinHandle<()>,
}

/// Spawn the capture task on the current tokio runtime.
pub fn spawn(config: &CaptureConfig, deps: CaptureDeps) -> CaptureModule {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_depth.max(1));
    let (state_tx, state_rx) = watch::channel(CaptureState::Idle);
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (settled_tx, settled_rx) = mpsc::unbounded_channel();
    let metrics = CaptureMetrics::new();

    let controller = CaptureController {
        machine: CaptureMachine::new(
            config.countdown_ticks,
            SequenceBuilder::new(config.sequence_length),
        ),
        tick_interval: Duration::from_millis(config.tick_interval_ms),
        recording_duration: Duration::from_millis(config.recording_ms),
        labels: deps.labels,
        preprocessor: deps.preprocessor,
        submitter: deps.submitter,
        sink: deps.sink,
        commands: command_rx,
        frames: frame_rx,
        settled_tx,
        settled_rx,
        timers: None,
        in_flight: None,
        state_tx,
        notices: notice_tx,
        metrics: metrics.clone(),
    };

    let task = tokio::spawn(controller.run());

    CaptureModule {
        handle: CaptureHandle {
            commands: command_tx,
            frames: frame_tx,
            state: state_rx,
            metrics,
        },
        notices: notice_rx,
        task,
    }
}

enum TimerFired {
    Tick,
    RecordingElapsed,
}

/// Timers of the capture in progress. At most one is armed at a time.
#[derive(Default)]
struct SessionTimers {
    countdown: Option<Interval>,
    recording: Option<Pin<Box<Sleep>>>,
}

impl SessionTimers {
    fn arm_countdown(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.recording = None;
        self.countdown = Some(interval);
    }

    fn arm_recording(&mut self, duration: Duration) {
        self.countdown = None;
        self.recording = Some(Box::pin(sleep(duration)));
    }

    async fn fired(&mut self) -> TimerFired {
        if let Some(interval) = self.countdown.as_mut() {
            interval.tick().await;
            return TimerFired::Tick;
        }
        if let Some(recording) = self.recording.as_mut() {
            recording.as_mut().await;
            // one-shot
            self.recording = None;
            return TimerFired::RecordingElapsed;
        }
        pending().await
    }
}

async fn next_timer(timers: &mut Option<SessionTimers>) -> TimerFired {
    match timers {
        Some(timers) => timers.fired().await,
        None => pending().await,
    }
}

type Settlement = Result<PredictionResult, ApiError>;

struct CaptureController {
    machine: CaptureMachine,
    tick_interval: Duration,
    recording_duration: Duration,
    labels: Arc<dyn LabelSource>,
    preprocessor: Arc<dyn FramePreprocessor>,
    submitter: Arc<dyn PredictionSubmitter>,
    sink: Box<dyn ResultSink>,
    commands: mpsc::Receiver<Command>,
    frames: mpsc::Receiver<RawFrame>,
    settled_tx: mpsc::UnboundedSender<Settlement>,
    settled_rx: mpsc::UnboundedReceiver<Settlement>,
    timers: Option<SessionTimers>,
    in_flight: Option<JoinHandle<()>>,
    state_tx: watch::Sender<CaptureState>,
    notices: mpsc::UnboundedSender<CaptureNotice>,
    metrics: CaptureMetrics,
}

impl CaptureController {
    async fn run(mut self) {
        info!("📷 Capture task ready");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        let label = self.labels.selected_label();
                        self.dispatch(CaptureInput::Start(label));
                    }
                    Some(Command::Stop) => {
                        if self.machine.state().is_cancellable() {
                            self.metrics.inc(&self.metrics.cancels);
                        }
                        self.dispatch(CaptureInput::Cancel);
                    }
                    Some(Command::CameraError(reason)) => {
                        self.dispatch(CaptureInput::CameraError(reason));
                    }
                    Some(Command::Shutdown) | None => break,
                },

                Some(outcome) = self.settled_rx.recv() => {
                    self.in_flight = None;
                    self.dispatch(CaptureInput::Settled(outcome));
                }

                fired = next_timer(&mut self.timers) => match fired {
                    TimerFired::Tick => self.dispatch(CaptureInput::Tick),
                    TimerFired::RecordingElapsed => {
                        self.drain_queued_frames();
                        self.dispatch(CaptureInput::DurationElapsed);
                    }
                },

                Some(frame) = self.frames.recv() => self.on_frame(frame),
            }
        }

        self.teardown();
    }

    fn dispatch(&mut self, input: CaptureInput) {
        for effect in self.machine.apply(input) {
            self.perform(effect);
        }
        self.publish_state();
    }

    fn perform(&mut self, effect: CaptureEffect) {
        match effect {
            CaptureEffect::ArmCountdown => {
                self.metrics.inc(&self.metrics.attempts_started);
                self.timers
                    .get_or_insert_with(SessionTimers::default)
                    .arm_countdown(self.tick_interval);
            }
            CaptureEffect::ArmRecording => {
                self.metrics.inc(&self.metrics.recordings);
                self.timers
                    .get_or_insert_with(SessionTimers::default)
                    .arm_recording(self.recording_duration);
            }
            CaptureEffect::DisarmTimers => {
                self.timers = None;
            }
            CaptureEffect::Submit(request) => self.submit(request),
            CaptureEffect::Deliver(result) => self.sink.deliver(result),
            CaptureEffect::Notify(notice) => {
                match &notice {
                    CaptureNotice::NoLabelSelected | CaptureNotice::Busy(_) => {
                        self.metrics.inc(&self.metrics.starts_rejected)
                    }
                    CaptureNotice::FallbackSequence => {
                        self.metrics.inc(&self.metrics.fallback_sequences)
                    }
                    CaptureNotice::SubmissionFailed(_) => {
                        self.metrics.inc(&self.metrics.submission_failures)
                    }
                    CaptureNotice::CameraDegraded(_) => {}
                }
                if self.notices.send(notice).is_err() {
                    debug!("Notice receiver dropped");
                }
            }
        }
    }

    fn submit(&mut self, request: PredictionRequest) {
        self.metrics.inc(&self.metrics.submissions);
        let submitter = Arc::clone(&self.submitter);
        let settled = self.settled_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = submitter.submit(&request).await;
            let _ = settled.send(outcome);
        }));
    }

    fn on_frame(&mut self, frame: RawFrame) {
        if !self.machine.accepts_frames() {
            self.metrics.inc(&self.metrics.frames_dropped);
            return;
        }
        match self.preprocessor.preprocess(&frame) {
            Ok(features) => {
                self.machine.apply(CaptureInput::Frame(features));
                self.metrics.inc(&self.metrics.frames_accepted);
            }
            Err(e) => {
                warn!("Dropping frame at {:.0} ms: {}", frame.timestamp_ms, e);
                self.metrics.inc(&self.metrics.frames_dropped);
            }
        }
    }

    /// Frames accepted by the handle before expiry still belong to the window.
    fn drain_queued_frames(&mut self) {
        while let Ok(frame) = self.frames.try_recv() {
            self.on_frame(frame);
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn teardown(&mut self) {
        self.timers = None;
        if let Some(task) = self.in_flight.take() {
            warn!("Abandoning in-flight prediction on shutdown");
            task.abort();
        }
        self.machine.reset();
        self.publish_state();
        info!("📷 Capture task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::PreprocessError;
    use crate::store::AppStore;
    use crate::types::{FrameVector, Label};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Treats every byte of the frame as one feature.
    struct ByteFeatures;

    impl FramePreprocessor for ByteFeatures {
        fn preprocess(&self, frame: &RawFrame) -> Result<FrameVector, PreprocessError> {
            Ok(frame.data.iter().map(|b| *b as f32).collect())
        }

        fn feature_len(&self) -> usize {
            4
        }
    }

    #[derive(Default)]
    struct FakeSubmitter {
        requests: Mutex<Vec<PredictionRequest>>,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl FakeSubmitter {
        fn requests(&self) -> Vec<PredictionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PredictionSubmitter for FakeSubmitter {
        async fn submit(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(ApiError::Status {
                    status: 503,
                    reason: "Service Unavailable".to_string(),
                });
            }
            Ok(PredictionResult(json!({ "label": request.expected_label })))
        }
    }

    struct Harness {
        module: CaptureModule,
        submitter: Arc<FakeSubmitter>,
        results: mpsc::UnboundedReceiver<PredictionResult>,
    }

    impl Harness {
        fn handle(&self) -> CaptureHandle {
            self.module.handle.clone()
        }
    }

    fn harness(submitter: FakeSubmitter, label: Option<Label>) -> Harness {
        let store = Arc::new(AppStore::new());
        store.set_current_label(label);
        let submitter = Arc::new(submitter);
        let (result_tx, results) = mpsc::unbounded_channel();

        let module = spawn(
            &CaptureConfig::default(),
            CaptureDeps {
                labels: store,
                preprocessor: Arc::new(ByteFeatures),
                submitter: submitter.clone(),
                sink: Box::new(move |result: PredictionResult| {
                    let _ = result_tx.send(result);
                }),
            },
        );

        Harness {
            module,
            submitter,
            results,
        }
    }

    fn hola() -> Option<Label> {
        Some(Label::new("A", "Hola"))
    }

    fn frame(data: Vec<u8>) -> RawFrame {
        RawFrame {
            data,
            width: 1,
            height: 1,
            timestamp_ms: 0.0,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<CaptureState>, target: CaptureState) {
        rx.wait_for(|s| *s == target).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_submits_first_100_values_once() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();
        let started = Instant::now();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Recording).await;
        assert!(started.elapsed() >= Duration::from_millis(3000));

        for i in 0..45u8 {
            let base = i * 4;
            assert!(handle.push_frame(frame(vec![base, base + 1, base + 2, base + 3])));
        }

        let result = h.results.recv().await.unwrap();
        assert_eq!(result.into_inner()["label"], "Hola");
        assert!(started.elapsed() >= Duration::from_millis(6000));
        wait_for_state(&mut state, CaptureState::Idle).await;

        let requests = h.submitter.requests();
        assert_eq!(requests.len(), 1);
        let expected: Vec<f32> = (0..100).map(|v| v as f32).collect();
        assert_eq!(requests[0].sequence, expected);
        assert_eq!(requests[0].expected_label, "Hola");

        let summary = handle.metrics().summary();
        assert_eq!(summary.frames_accepted, 45);
        assert_eq!(summary.submissions, 1);
        assert_eq!(summary.recordings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_queued_at_expiry_are_kept() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Recording).await;

        // Frames still queued when the window closes
        for i in 0..30u8 {
            assert!(handle.push_frame(frame(vec![i, i, i, i])));
        }
        tokio::time::advance(Duration::from_millis(3000)).await;

        h.results.recv().await.unwrap();
        let requests = h.submitter.requests();
        assert_eq!(requests[0].sequence.len(), 100);
        assert_eq!(requests[0].sequence[0], 0.0);
        assert_eq!(requests[0].sequence[99], 24.0);
        let summary = handle.metrics().summary();
        assert_eq!(summary.frames_accepted, 30);
        assert_eq!(summary.frames_dropped, 0);
        assert_eq!(summary.fallback_sequences, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_label_is_rejected() {
        let mut h = harness(FakeSubmitter::default(), None);
        let handle = h.handle();

        handle.start().await.unwrap();
        assert_eq!(
            h.module.notices.recv().await,
            Some(CaptureNotice::NoLabelSelected)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.state(), CaptureState::Idle);
        assert!(h.submitter.requests().is_empty());
        let summary = handle.metrics().summary();
        assert_eq!(summary.attempts_started, 0);
        assert_eq!(summary.starts_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown() {
        let h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Countdown(2)).await;
        handle.stop().await.unwrap();
        wait_for_state(&mut state, CaptureState::Idle).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.state(), CaptureState::Idle);
        assert!(h.submitter.requests().is_empty());
        let summary = handle.metrics().summary();
        assert_eq!(summary.recordings, 0);
        assert_eq!(summary.cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_recording_discards_frames() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Recording).await;
        for _ in 0..5 {
            handle.push_frame(frame(vec![1, 2, 3, 4]));
        }
        handle.stop().await.unwrap();
        wait_for_state(&mut state, CaptureState::Idle).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.submitter.requests().is_empty());
        assert!(h.results.try_recv().is_err());
        assert!(!handle.push_frame(frame(vec![1])));

        // Cancelling again is a no-op
        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.metrics().summary().cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_frames_submits_fallback() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();

        handle.start().await.unwrap();
        h.results.recv().await.unwrap();

        let requests = h.submitter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sequence.len(), 100);
        assert!(requests[0].sequence.iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(
            h.module.notices.recv().await,
            Some(CaptureNotice::FallbackSequence)
        );
        assert_eq!(handle.metrics().summary().fallback_sequences, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_during_countdown_are_dropped() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Countdown(3)).await;
        assert!(!handle.push_frame(frame(vec![9, 9, 9, 9])));

        h.results.recv().await.unwrap();
        let requests = h.submitter.requests();
        assert_eq!(requests[0].sequence.len(), 100);
        assert!(requests[0].sequence.iter().all(|v| *v < 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_returns_to_idle() {
        let submitter = FakeSubmitter {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(submitter, hola());
        let handle = h.handle();

        handle.start().await.unwrap();
        loop {
            match h.module.notices.recv().await {
                Some(CaptureNotice::SubmissionFailed(msg)) => {
                    assert!(msg.contains("503"));
                    break;
                }
                Some(_) => continue,
                None => panic!("notice channel closed"),
            }
        }

        let mut state = handle.subscribe();
        wait_for_state(&mut state, CaptureState::Idle).await;
        assert!(h.results.try_recv().is_err());
        assert_eq!(h.submitter.requests().len(), 1);
        assert_eq!(handle.metrics().summary().submission_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_while_submitting_and_exactly_once_per_cycle() {
        let gate = Arc::new(Notify::new());
        let submitter = FakeSubmitter {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let mut h = harness(submitter, hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Submitting).await;

        handle.start().await.unwrap();
        handle.stop().await.unwrap();
        loop {
            match h.module.notices.recv().await {
                Some(CaptureNotice::Busy(s)) => {
                    assert_eq!(s, CaptureState::Submitting);
                    break;
                }
                Some(_) => continue,
                None => panic!("notice channel closed"),
            }
        }
        assert_eq!(handle.state(), CaptureState::Submitting);

        gate.notify_one();
        h.results.recv().await.unwrap();
        wait_for_state(&mut state, CaptureState::Idle).await;
        assert_eq!(h.submitter.requests().len(), 1);

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Submitting).await;
        gate.notify_one();
        h.results.recv().await.unwrap();
        assert_eq!(h.submitter.requests().len(), 2);
        assert_eq!(handle.metrics().summary().cancels, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_error_degrades_to_fallback() {
        let mut h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();

        handle.report_camera_error("permission denied").await.unwrap();
        assert_eq!(
            h.module.notices.recv().await,
            Some(CaptureNotice::CameraDegraded("permission denied".to_string()))
        );

        handle.start().await.unwrap();
        h.results.recv().await.unwrap();
        assert_eq!(h.submitter.requests()[0].sequence.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_timers() {
        let h = harness(FakeSubmitter::default(), hola());
        let handle = h.handle();
        let mut state = handle.subscribe();

        handle.start().await.unwrap();
        wait_for_state(&mut state, CaptureState::Recording).await;
        handle.shutdown().await.unwrap();
        h.module.task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.submitter.requests().is_empty());
        assert_eq!(handle.state(), CaptureState::Idle);
        assert_eq!(handle.start().await, Err(CaptureError::Closed));
    }
}
