//! # Comprimir: Post-Training Layer Quantization
//!
//! Comprimir compresses neural-network layer weights to low-bit integer
//! grids using second-order (Hessian-aware) error compensation, the GPTQ
//! algorithm. Calibration activations are streamed into a running Hessian
//! estimate; a blockwise solver then quantizes the weight column by column,
//! propagating each column's quantization error onto the columns not yet
//! processed.
//!
//! ## Architecture
//!
//! - **gptq**: the per-layer compression kernel — Hessian accumulator,
//!   activation-order permuter, parameter observer, blockwise solver, and
//!   the accumulate → compress → free session lifecycle
//!
//! Model-wide orchestration (layer iteration, hook installation) and
//! serialization of the compressed model are left to the host.

pub mod gptq;

// Re-export commonly used types
pub use gptq::{
    CompressibleLayer, GptqConfig, GptqError, LayerCompressionSession, LinearLayer,
    QuantizationArgs, QuantizationScheme, QuantizationStrategy, Result, SessionState,
};
