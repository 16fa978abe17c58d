// src/sequence.rs
//
// Builds the fixed-length sequence sent to the prediction service.
//
//   frames present → flatten in arrival order, truncate to `length`
//                    (shorter data is sent as-is, never padded)
//   no frames      → `length` uniform values in [0, 1)

use crate::types::FrameVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Sequence {
    values: Vec<f32>,
    #[serde(skip)]
    fallback: bool,
}

impl Sequence {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the values are synthetic placeholders
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

pub struct SequenceBuilder {
    length: usize,
    rng: Option<StdRng>,
}

impl SequenceBuilder {
    pub fn new(length: usize) -> Self {
        Self { length, rng: None }
    }

    /// Deterministic fallback values, for reproducible runs.
    pub fn with_seed(length: usize, seed: u64) -> Self {
        Self {
            length,
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn build(&mut self, frames: &[FrameVector]) -> Sequence {
        if frames.is_empty() {
            return self.fallback();
        }

        let values: Vec<f32> = frames
            .iter()
            .flatten()
            .copied()
            .take(self.length)
            .collect();

        if values.len() < self.length {
            warn!(
                "Sequence short: {} values from {} frames (expected {})",
                values.len(),
                frames.len(),
                self.length
            );
        } else {
            debug!("Sequence built from {} frames", frames.len());
        }

        Sequence {
            values,
            fallback: false,
        }
    }

    fn fallback(&mut self) -> Sequence {
        let length = self.length;
        let values = match self.rng.as_mut() {
            Some(rng) => (0..length).map(|_| rng.random::<f32>()).collect(),
            None => {
                let mut rng = rand::rng();
                (0..length).map(|_| rng.random::<f32>()).collect()
            }
        };
        warn!("No frames captured, using {} synthetic values", length);
        Sequence {
            values,
            fallback: true,
        }
    }
}
