//! Running Hessian accumulator
//!
//! Maintains a batch-weighted second-moment matrix of layer inputs. Earlier
//! batches are weighted down as more samples arrive, so the accumulated
//! matrix approximates `E[2·x·xᵗ]` regardless of calibration-set size.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayView2};

use super::error::{GptqError, Result};

/// Running second-moment matrix of layer input activations
#[derive(Clone, Debug)]
pub struct HessianAccumulator {
    h: Array2<f32>,
    n_samples: usize,
    columns: usize,
}

impl HessianAccumulator {
    /// Create a zeroed accumulator for `columns` input features
    pub fn new(columns: usize) -> Self {
        Self { h: Array2::zeros((columns, columns)), n_samples: 0, columns }
    }

    /// Fold a batch of input activations into the running estimate
    ///
    /// # Arguments
    /// * `inp` - Activations of shape `[positions, columns]`; callers flatten
    ///   any leading batch/sequence rank to positions
    pub fn add_batch(&mut self, inp: ArrayView2<f32>) -> Result<()> {
        if inp.ncols() != self.columns {
            return Err(GptqError::ShapeMismatch {
                expected: vec![inp.nrows(), self.columns],
                got: vec![inp.nrows(), inp.ncols()],
            });
        }
        let batch = inp.nrows();
        if batch == 0 {
            return Ok(());
        }

        // H <- H * n/(n+b), n <- n+b, H <- H + (2/n) X'X
        self.h *= self.n_samples as f32 / (self.n_samples + batch) as f32;
        self.n_samples += batch;
        let scaled = inp.to_owned() * (2.0 / self.n_samples as f32).sqrt();
        general_mat_mul(1.0, &scaled.t(), &scaled, 1.0, &mut self.h);
        Ok(())
    }

    /// Current Hessian estimate
    pub fn matrix(&self) -> &Array2<f32> {
        &self.h
    }

    /// Consume the accumulator, yielding the Hessian
    pub fn into_matrix(self) -> Array2<f32> {
        self.h
    }

    /// Number of samples folded in so far
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Input feature dimension
    pub fn columns(&self) -> usize {
        self.columns
    }
}
