//! Error types for GPTQ layer compression

use thiserror::Error;

/// Errors raised by Hessian accumulation and the blockwise solver
#[derive(Error, Debug)]
pub enum GptqError {
    #[error("invalid quantization configuration: {0}")]
    InvalidConfig(String),

    #[error("damped hessian is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("invalid session state: expected {expected}, session is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, GptqError>;
