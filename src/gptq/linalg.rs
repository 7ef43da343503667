//! Cholesky routines for the damped Hessian
//!
//! The solver needs `chol(H)`, the inverse assembled from that factor, and
//! the upper factor of the inverse. Dense factorization on `ndarray`; the
//! matrices involved are `[columns, columns]` and symmetric.

use ndarray::Array2;

use super::error::{GptqError, Result};

/// Lower Cholesky factor L with `A = L·Lᵗ`
///
/// Fails when the matrix is not positive definite.
pub fn cholesky_lower(a: &Array2<f32>) -> Result<Array2<f32>> {
    let n = a.nrows();
    let mut l = Array2::<f32>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(GptqError::NotPositiveDefinite { pivot: i });
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Assemble `A⁻¹ = L⁻ᵗ·L⁻¹` from the lower Cholesky factor
pub fn cholesky_inverse(l: &Array2<f32>) -> Array2<f32> {
    let n = l.nrows();
    // forward substitution for L⁻¹, column by column
    let mut l_inv = Array2::<f32>::zeros((n, n));
    for j in 0..n {
        l_inv[[j, j]] = 1.0 / l[[j, j]];
        for i in j + 1..n {
            let mut sum = 0.0;
            for k in j..i {
                sum += l[[i, k]] * l_inv[[k, j]];
            }
            l_inv[[i, j]] = -sum / l[[i, i]];
        }
    }
    l_inv.t().dot(&l_inv)
}

/// Upper Cholesky factor U with `A = Uᵗ·U`
pub fn cholesky_upper(a: &Array2<f32>) -> Result<Array2<f32>> {
    Ok(cholesky_lower(a)?.reversed_axes().as_standard_layout().to_owned())
}
