//! Quantization configuration types
//!
//! Per-layer quantization arguments are supplied by the host orchestrator:
//! strategy, bit width, group size, activation ordering. The GPTQ pass itself
//! is tuned through [`GptqConfig`] (block size and Hessian damping).

use serde::{Deserialize, Serialize};

use super::error::{GptqError, Result};

/// Zero fraction above which zero-preservation masking activates.
///
/// Layers at or above this sparsity ratio keep their pruned positions exactly
/// zero through quantization.
pub const SPARSITY_THRESHOLD: f32 = 0.05;

/// Default number of columns compressed per block.
pub const DEFAULT_BLOCKSIZE: usize = 128;

/// Default Hessian dampening, as a fraction of the mean diagonal.
pub const DEFAULT_PERCDAMP: f32 = 0.01;

/// Granularity at which scale/zero-point are shared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QuantizationStrategy {
    /// Single scale/zero-point for the entire weight
    #[default]
    Tensor,
    /// Separate scale/zero-point per output channel (weight row)
    Channel,
    /// Separate scale/zero-point per (output channel, column group)
    Group,
}

/// Column reordering policy applied before quantization
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ActivationOrdering {
    /// No reordering
    #[default]
    None,
    /// Permute by activation order first, then assign groups on the permuted
    /// columns; the group index map must be persisted after un-permutation
    Group,
    /// Assign groups on the original columns first, then permute; the group
    /// index map returns to identity after un-permutation
    Weight,
}

/// Integer grid the weight is discretized onto
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationScheme {
    /// Bit width (2 to 8)
    pub bits: u8,
    /// Symmetric grid centered on zero (zero-point fixed at 0)
    pub symmetric: bool,
}

impl QuantizationScheme {
    /// Symmetric scheme at the given bit width
    pub fn symmetric(bits: u8) -> Self {
        Self { bits, symmetric: true }
    }

    /// Asymmetric scheme at the given bit width
    pub fn asymmetric(bits: u8) -> Self {
        Self { bits, symmetric: false }
    }

    /// Lowest representable grid value
    pub fn q_min(&self) -> f32 {
        if self.symmetric {
            -((1i32 << (self.bits - 1)) as f32)
        } else {
            0.0
        }
    }

    /// Highest representable grid value
    pub fn q_max(&self) -> f32 {
        if self.symmetric {
            ((1i32 << (self.bits - 1)) - 1) as f32
        } else {
            ((1i32 << self.bits) - 1) as f32
        }
    }
}

/// Per-layer quantization arguments consumed from the host orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuantizationArgs {
    /// Integer grid
    pub scheme: QuantizationScheme,
    /// Scale/zero-point sharing granularity
    pub strategy: QuantizationStrategy,
    /// Columns per group; required for the Group strategy
    pub group_size: Option<usize>,
    /// Column reordering policy (only meaningful under the Group strategy)
    pub actorder: ActivationOrdering,
}

impl QuantizationArgs {
    /// Tensor-strategy arguments
    pub fn tensor(scheme: QuantizationScheme) -> Self {
        Self { scheme, strategy: QuantizationStrategy::Tensor, group_size: None, actorder: ActivationOrdering::None }
    }

    /// Channel-strategy arguments
    pub fn channel(scheme: QuantizationScheme) -> Self {
        Self { scheme, strategy: QuantizationStrategy::Channel, group_size: None, actorder: ActivationOrdering::None }
    }

    /// Group-strategy arguments
    pub fn group(scheme: QuantizationScheme, group_size: usize) -> Self {
        Self {
            scheme,
            strategy: QuantizationStrategy::Group,
            group_size: Some(group_size),
            actorder: ActivationOrdering::None,
        }
    }

    /// Set the activation ordering policy
    pub fn with_actorder(mut self, actorder: ActivationOrdering) -> Self {
        self.actorder = actorder;
        self
    }

    /// Validate the argument combination
    pub fn validate(&self) -> Result<()> {
        if self.scheme.bits < 2 || self.scheme.bits > 8 {
            return Err(GptqError::InvalidConfig(format!(
                "bit width must be in 2..=8, got {}",
                self.scheme.bits
            )));
        }
        if self.strategy == QuantizationStrategy::Group {
            match self.group_size {
                Some(size) if size > 0 => {}
                _ => {
                    return Err(GptqError::InvalidConfig(
                        "Group strategy requires a positive group_size".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Number of scale/zero-point groups for a weight with `columns` columns
    pub fn num_groups(&self, columns: usize) -> usize {
        match self.strategy {
            QuantizationStrategy::Tensor | QuantizationStrategy::Channel => 1,
            QuantizationStrategy::Group => {
                let size = self.group_size.unwrap_or(columns).max(1);
                columns.div_ceil(size)
            }
        }
    }
}

/// Tuning parameters for the blockwise GPTQ pass
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GptqConfig {
    /// Number of columns compressed per block
    pub blocksize: usize,
    /// Dampening added to the Hessian diagonal, as a fraction of its mean
    pub percdamp: f32,
}

impl Default for GptqConfig {
    fn default() -> Self {
        Self { blocksize: DEFAULT_BLOCKSIZE, percdamp: DEFAULT_PERCDAMP }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GptqConfig::default();
        assert_eq!(config.blocksize, 128);
        assert!((config.percdamp - 0.01).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scheme_bounds_symmetric() {
        let scheme = QuantizationScheme::symmetric(4);
        assert_eq!(scheme.q_min(), -8.0);
        assert_eq!(scheme.q_max(), 7.0);
    }

    #[test]
    fn test_scheme_bounds_asymmetric() {
        let scheme = QuantizationScheme::asymmetric(8);
        assert_eq!(scheme.q_min(), 0.0);
        assert_eq!(scheme.q_max(), 255.0);
    }

    #[test]
    fn test_group_requires_group_size() {
        let mut args = QuantizationArgs::group(QuantizationScheme::symmetric(4), 32);
        assert!(args.validate().is_ok());

        args.group_size = None;
        assert!(args.validate().is_err());

        args.group_size = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_bits_out_of_range_rejected() {
        let args = QuantizationArgs::tensor(QuantizationScheme::symmetric(1));
        assert!(args.validate().is_err());

        let args = QuantizationArgs::tensor(QuantizationScheme::symmetric(9));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_num_groups() {
        let args = QuantizationArgs::group(QuantizationScheme::symmetric(4), 32);
        assert_eq!(args.num_groups(128), 4);
        assert_eq!(args.num_groups(100), 4); // final group shorter

        let args = QuantizationArgs::channel(QuantizationScheme::symmetric(4));
        assert_eq!(args.num_groups(128), 1);
    }
}
