//! Post-training GPTQ layer quantization
//!
//! Quantizes one layer's weight to a low-bit grid while minimizing the
//! reconstruction error under observed activation statistics:
//!
//! - **Hessian accumulation**: a running second-moment matrix of layer
//!   inputs, fed batch by batch during calibration
//! - **Blockwise solver**: damps and factorizes the Hessian, quantizes
//!   columns sequentially and redistributes each column's residual onto the
//!   columns still to come
//! - **Session lifecycle**: accumulate → compress → free, exactly one
//!   compression pass per layer
//!
//! # Example
//!
//! ```
//! use comprimir::gptq::{
//!     GptqConfig, LayerCompressionSession, LinearLayer, QuantizationArgs,
//!     QuantizationScheme,
//! };
//! use ndarray::Array2;
//!
//! let weight = Array2::from_shape_fn((8, 4), |(r, c)| (r + c) as f32 * 0.1 - 0.5);
//! let mut layer = LinearLayer::new(weight)
//!     .with_quantization(QuantizationArgs::tensor(QuantizationScheme::symmetric(4)));
//!
//! let mut session = LayerCompressionSession::new("fc1", 4);
//! let calib = Array2::from_shape_fn((16, 4), |(r, c)| ((r * c) as f32).sin());
//! session.add_batch(calib.view().into_dyn(), None).unwrap();
//! session.compress(&mut layer, &GptqConfig::default()).unwrap();
//! session.free().unwrap();
//!
//! assert!(layer.quantization_params().is_some());
//! ```

mod actorder;
mod config;
mod error;
mod hessian;
mod layer;
mod linalg;
mod observer;
mod report;
mod session;
mod solver;
#[cfg(test)]
mod tests;

pub use actorder::{
    activation_order, invert_permutation, permute_columns, permute_hessian, permute_indices,
};
pub use config::{
    ActivationOrdering, GptqConfig, QuantizationArgs, QuantizationScheme, QuantizationStrategy,
    DEFAULT_BLOCKSIZE, DEFAULT_PERCDAMP, SPARSITY_THRESHOLD,
};
pub use error::{GptqError, Result};
pub use hessian::HessianAccumulator;
pub use layer::{CompressibleLayer, Device, LinearLayer, QuantizedLayerParams};
pub use observer::QuantObserver;
pub use report::{CompressionMetrics, CompressionReporter, NoopReporter, TracingReporter};
pub use session::{LayerCompressionSession, SessionState};
pub use solver::{nonzero_mask, quantize_blockwise, tensor_sparsity};
