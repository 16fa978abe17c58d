// src/store.rs
//
// Label and practice-history store.
//
// Holds the label list, the currently selected label and the prediction
// history (newest first). The capture task only reads the selected label
// through `LabelSource`; recording results into history is the caller's
// job. State can be snapshotted to a JSON file and restored.

use crate::types::{Label, PredictionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read access to the label the user is practicing.
pub trait LabelSource: Send + Sync {
    fn selected_label(&self) -> Option<Label>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub expected_label: String,
    pub result: PredictionResult,
    pub recorded_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(expected_label: impl Into<String>, result: PredictionResult) -> Self {
        Self {
            expected_label: expected_label.into(),
            result,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub labels: Vec<Label>,
    pub records: Vec<PredictionRecord>,
    pub current_label: Option<Label>,
    #[serde(skip)]
    pub is_loading: bool,
    #[serde(skip)]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct AppStore {
    state: RwLock<StoreState>,
}

impl AppStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn set_labels(&self, labels: Vec<Label>) {
        debug!("Store: {} labels", labels.len());
        self.write().labels = labels;
    }

    pub fn set_records(&self, records: Vec<PredictionRecord>) {
        self.write().records = records;
    }

    pub fn set_current_label(&self, label: Option<Label>) {
        self.write().current_label = label;
    }

    /// Select the first label whose name or id matches `key`.
    pub fn select_label(&self, key: &str) -> Option<Label> {
        let mut state = self.write();
        let found = state
            .labels
            .iter()
            .find(|l| l.name == key || l.id == key)
            .cloned();
        if found.is_some() {
            state.current_label = found.clone();
        }
        found
    }

    pub fn add_record(&self, record: PredictionRecord) {
        self.write().records.insert(0, record);
    }

    pub fn set_loading(&self, is_loading: bool) {
        self.write().is_loading = is_loading;
    }

    pub fn set_error(&self, error: Option<String>) {
        self.write().error = error;
    }

    pub fn labels(&self) -> Vec<Label> {
        self.read().labels.clone()
    }

    pub fn records(&self) -> Vec<PredictionRecord> {
        self.read().records.clone()
    }

    pub fn snapshot(&self) -> StoreState {
        self.read().clone()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&*self.read())?;
        fs::write(path, json)?;
        info!("💾 Store saved to {}", path.display());
        Ok(())
    }

    /// Restore from a snapshot; a missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No store snapshot at {}", path.display());
            return Ok(Self::new());
        }
        let data = fs::read(path)?;
        let state: StoreState = serde_json::from_slice(&data)?;
        info!(
            "💾 Store restored: {} labels, {} records",
            state.labels.len(),
            state.records.len()
        );
        Ok(Self::from_state(state))
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LabelSource for AppStore {
    fn selected_label(&self) -> Option<Label> {
        self.read().current_label.clone()
    }
}
