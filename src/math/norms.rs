//! Norm computations for vectors and lists of arrays.
//!
//! Provides L2 (Euclidean) norm functions used by clipping. The global
//! norm treats every element of every array as one long vector.
//!
//! Squares are accumulated in `f64`: an `f32` element above ~1.8e19 would
//! overflow when squared in `f32`.

use ndarray::ArrayD;

/// Compute the L2 (Euclidean) norm of an f32 slice.
pub fn l2_norm(v: &[f32]) -> f64 {
    l2_norm_sq(v).sqrt()
}

/// Compute the squared L2 norm of an f32 slice (avoids sqrt).
pub fn l2_norm_sq(v: &[f32]) -> f64 {
    l2_norm_sq_iter(v.iter())
}

/// Squared L2 norm over any iterator of element references.
///
/// Works on non-contiguous array views where a slice is not available.
pub fn l2_norm_sq_iter<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f32>,
{
    values
        .into_iter()
        .map(|&x| {
            let x = f64::from(x);
            x * x
        })
        .sum()
}

/// Joint L2 norm across a list of arrays: `sqrt(sum_i ||t_i||^2)`.
///
/// An empty list has norm 0.
pub fn global_l2_norm(leaves: &[&ArrayD<f32>]) -> f64 {
    leaves
        .iter()
        .map(|leaf| l2_norm_sq_iter(leaf.iter()))
        .sum::<f64>()
        .sqrt()
}
