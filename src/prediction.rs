// src/prediction.rs
//
// Prediction submission. One request per completed recording:
//
//   POST {base}/predict
//   { "sequence": [f32; ≤100], "expected_label": "<label name>" }
//
// The response body is forwarded untouched as `PredictionResult`.

use crate::api::{ApiClient, ApiError};
use crate::types::{ApiConfig, PredictionResult};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub sequence: Vec<f32>,
    pub expected_label: String,
}

#[async_trait::async_trait]
pub trait PredictionSubmitter: Send + Sync {
    /// Submit one sequence. Any transport failure, non-2xx status or
    /// undecodable body is an error; callers do not retry.
    async fn submit(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError>;
}

pub struct PredictionClient {
    api: ApiClient,
    predict_path: String,
}

impl PredictionClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api: ApiClient::new(config)?,
            predict_path: config.predict_path.clone(),
        })
    }

    pub fn from_api(api: ApiClient, predict_path: impl Into<String>) -> Self {
        Self {
            api,
            predict_path: predict_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl PredictionSubmitter for PredictionClient {
    async fn submit(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError> {
        let submission_id = uuid::Uuid::new_v4();
        info!(
            "🔮 Submitting prediction {} ({} values, expected={})",
            submission_id,
            request.sequence.len(),
            request.expected_label
        );

        match self.api.post(&self.predict_path, request).await {
            Ok(result) => {
                info!("🔮 Prediction {} complete", submission_id);
                Ok(result)
            }
            Err(e) => {
                error!("🔮 Prediction {} failed: {}", submission_id, e);
                Err(e)
            }
        }
    }
}
