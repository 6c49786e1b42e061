//! Weight Policy
//!
//! Holds the two target weights. Updates must sum to 100 and must actually
//! change something.

use crate::error::{AllocatorError, AllocatorResult};
use crate::types::Weights;
use tracing::info;

#[derive(Debug, Clone)]
pub struct WeightPolicy {
    weights: Weights,
}

impl WeightPolicy {
    pub fn new(weights: Weights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    /// Replace both weights. Returns the previous weights on success.
    ///
    /// Rejected as a no-op only when both values match the current ones;
    /// changing a single side is a real update.
    pub fn set_weights(&mut self, a: u8, b: u8) -> AllocatorResult<Weights> {
        let next = Weights::new(a, b)?;
        if next == self.weights {
            return Err(AllocatorError::NoOpUpdate { a, b });
        }

        let previous = self.weights;
        self.weights = next;
        info!("Weights updated: {} -> {}", previous, next);
        Ok(previous)
    }
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self::new(Weights::default())
    }
}
