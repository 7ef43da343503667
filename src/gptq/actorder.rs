//! Activation-order column permutation
//!
//! Columns with the largest Hessian diagonal carry the most activation
//! energy and are quantized first. All helpers track the inverse permutation
//! so the weight (and group index map) can be restored afterwards.

use ndarray::{Array2, ArrayView1, Axis};
use std::cmp::Ordering;

/// Column order by descending Hessian diagonal
pub fn activation_order(diag: ArrayView1<f32>) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..diag.len()).collect();
    perm.sort_by(|&a, &b| diag[b].partial_cmp(&diag[a]).unwrap_or(Ordering::Equal));
    perm
}

/// Inverse permutation: `inv[perm[i]] == i`
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}

/// Reorder weight columns: output column `i` is input column `perm[i]`
pub fn permute_columns(w: &Array2<f32>, perm: &[usize]) -> Array2<f32> {
    w.select(Axis(1), perm)
}

/// Reorder both axes of the Hessian consistently with the columns
pub fn permute_hessian(h: &Array2<f32>, perm: &[usize]) -> Array2<f32> {
    h.select(Axis(0), perm).select(Axis(1), perm)
}

/// Reorder an index map: output entry `i` is input entry `perm[i]`
pub fn permute_indices(indices: &[usize], perm: &[usize]) -> Vec<usize> {
    perm.iter().map(|&p| indices[p]).collect()
}
