// src/lib.rs
//
// Capture-and-predict orchestration for sign-language practice.

pub mod api;
pub mod capture;
pub mod config;
pub mod frame_buffer;
pub mod prediction;
pub mod preprocessing;
pub mod proxy;
pub mod sequence;
pub mod store;
pub mod types;

pub use api::{ApiClient, ApiError};
pub use capture::{spawn, CaptureDeps, CaptureHandle, CaptureModule, CaptureNotice, CaptureState};
pub use prediction::{PredictionClient, PredictionRequest, PredictionSubmitter};
pub use preprocessing::{FramePreprocessor, GridPreprocessor};
pub use store::{AppStore, LabelSource, PredictionRecord};
pub use types::{Config, Label, PredictionResult, RawFrame};
